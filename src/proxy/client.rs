use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::{net::TcpStream, sync::Mutex, time::timeout};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::protocol::{DeviceCommand, JsonLineCodec, Request, Response};
use crate::{
    api::{validate_speed, validate_vibration_setting, DeviceApi},
    error::{F1Error, Result},
    types::{DiscoveredDevice, ProxyConfig},
};

/// Authorization state of this client as seen by the proxy server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteAuthorization {
    /// The operator granted control
    Authorized,
    /// Not decided yet
    NotAuthorized,
    /// The operator denied control
    Blocked,
}

/// Device API over a remote [`ProxyServer`](crate::ProxyServer)
///
/// Every operation is one request/response exchange. Raw register access and
/// subscriptions are not carried by the wire protocol.
pub struct ProxyClient {
    config: ProxyConfig,
    connection: Mutex<Option<Framed<TcpStream, JsonLineCodec>>>,
}

impl ProxyClient {
    /// Create a client for the server at `config.host:config.port`
    #[must_use]
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    /// Client configuration
    #[must_use]
    pub const fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Discovery only happens on the server side
    ///
    /// # Errors
    ///
    /// Always returns [`F1Error::UnsupportedOperation`].
    pub async fn discover(&self) -> Result<Vec<DiscoveredDevice>> {
        Err(F1Error::UnsupportedOperation(
            "discover is not supported on the proxy client".to_string(),
        ))
    }

    /// Connect to the proxy server and verify it answers
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Validation`] without a host or port,
    /// [`F1Error::Io`] if the socket cannot be opened, or the ping error.
    pub async fn connect(&self) -> Result<()> {
        if self.config.host.is_empty() || self.config.port == 0 {
            return Err(F1Error::Validation(
                "Address is required. Please provide host and port".to_string(),
            ));
        }

        let address = self.config.address();
        info!(target: "lelof1::proxy", "Attempting connection to {address}");
        let stream = TcpStream::connect(&address).await?;
        *self.connection.lock().await = Some(Framed::new(
            stream,
            JsonLineCodec::new(self.config.max_line_length),
        ));
        info!(target: "lelof1::proxy", "Successfully connected to {address}");

        debug!(target: "lelof1::proxy", "Verifying communication layer");
        if let Err(e) = self.ping().await {
            self.close().await;
            return Err(e);
        }
        Ok(())
    }

    async fn close(&self) {
        if self.connection.lock().await.take().is_some() {
            info!(target: "lelof1::proxy", "Disconnected from proxy server");
        }
    }

    /// Send one command and wait for its response
    ///
    /// The connection is held outside the client for the duration of the
    /// exchange. If the call is cancelled half way, the connection is dropped
    /// rather than left with an unread response.
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::NotConnected`] before [`ProxyClient::connect`],
    /// [`F1Error::Timeout`] if no response arrives in time (the connection is
    /// dropped), [`F1Error::Protocol`] for an unreadable response and
    /// [`F1Error::Remote`] for `ERROR` responses.
    pub async fn send_command(&self, command: &str, arguments: Vec<Value>) -> Result<Value> {
        let line = serde_json::to_string(&Request::new(command, arguments))?;

        let mut connection = self.connection.lock().await;
        let mut framed = connection.take().ok_or(F1Error::NotConnected)?;

        debug!(target: "lelof1::io", "SEND {line}");
        framed.send(line).await?;

        let received = match timeout(self.config.response_timeout(), framed.next()).await {
            Err(_) => {
                warn!(target: "lelof1::proxy", "No response to {command}, dropping connection");
                return Err(F1Error::Timeout {
                    timeout_ms: self.config.response_timeout_ms,
                });
            }
            Ok(None) => {
                return Err(F1Error::Transport(
                    "proxy server closed the connection".to_string(),
                ));
            }
            Ok(Some(Err(e))) => {
                warn!(target: "lelof1::proxy", "Receive failed, dropping connection: {e}");
                return Err(e);
            }
            Ok(Some(Ok(received))) => received,
        };
        *connection = Some(framed);
        drop(connection);

        let received = received?;
        debug!(target: "lelof1::io", "RECEIVED {received}");
        let response: Response = serde_json::from_str(&received)
            .map_err(|e| F1Error::Protocol(format!("Malformed response: {e}")))?;
        response.into_result()
    }

    async fn query<T: DeserializeOwned>(&self, command: DeviceCommand) -> Result<T> {
        let data = self
            .send_command(command.name(), command.arguments())
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    async fn act(&self, command: DeviceCommand) -> Result<()> {
        self.send_command(command.name(), command.arguments())
            .await
            .map(drop)
    }

    /// Whether the server granted this client control
    ///
    /// # Errors
    ///
    /// Returns the transport or remote error of the exchange.
    pub async fn get_remote_authorization(&self) -> Result<RemoteAuthorization> {
        match self.send_command("authorized", Vec::new()).await? {
            Value::Bool(true) => Ok(RemoteAuthorization::Authorized),
            Value::Bool(false) => Ok(RemoteAuthorization::NotAuthorized),
            Value::String(s) if s == "BLOCKED" => Ok(RemoteAuthorization::Blocked),
            other => Err(F1Error::Protocol(format!(
                "unexpected authorization status {other}"
            ))),
        }
    }

    /// Whether the server is connected to the device
    ///
    /// # Errors
    ///
    /// Returns the transport or remote error of the exchange.
    pub async fn get_remote_connected(&self) -> Result<bool> {
        Ok(serde_json::from_value(
            self.send_command("connected", Vec::new()).await?,
        )?)
    }

    /// Ask the server operator for control; resolves once they decide
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Remote`] if this client is blocked.
    pub async fn request_remote_authorization(&self) -> Result<bool> {
        Ok(serde_json::from_value(
            self.send_command("authorize", Vec::new()).await?,
        )?)
    }

    /// Set the name the server shows for this client
    ///
    /// # Errors
    ///
    /// Returns the transport or remote error of the exchange.
    pub async fn set_name(&self, name: &str) -> Result<()> {
        self.send_command("name", vec![json!(name)]).await.map(drop)
    }

    /// Take the control lock
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Remote`] if not authorized or another client holds it.
    pub async fn lock(&self) -> Result<()> {
        self.send_command("lock", Vec::new()).await.map(drop)
    }

    /// Release the control lock
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Remote`] if this client was not locking.
    pub async fn unlock(&self) -> Result<()> {
        self.send_command("unlock", Vec::new()).await.map(drop)
    }
}

#[async_trait]
impl DeviceApi for ProxyClient {
    async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    async fn is_authorized(&self) -> Result<bool> {
        if !self.is_connected().await {
            return Ok(false);
        }
        if self.get_remote_authorization().await? != RemoteAuthorization::Authorized {
            return Ok(false);
        }
        self.query(DeviceCommand::IsAuthorized).await
    }

    async fn assert_authorized(&self) -> Result<()> {
        if self.is_authorized().await? {
            Ok(())
        } else {
            Err(F1Error::NotAuthorized(
                "request authorization from the server and press the central button".to_string(),
            ))
        }
    }

    async fn ping(&self) -> Result<()> {
        match self.send_command("ping", Vec::new()).await? {
            Value::String(s) if s == "pong" => Ok(()),
            other => Err(F1Error::Protocol(format!("unexpected ping answer {other}"))),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.is_connected().await {
            warn!(target: "lelof1::proxy", "Client is not connected");
            return Ok(());
        }
        self.close().await;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.assert_authorized().await?;
        info!(target: "lelof1::proxy", "Stopping motors");
        self.stop_motors().await?;
        self.close().await;
        Ok(())
    }

    async fn get_manufacturer_name(&self) -> Result<String> {
        self.query(DeviceCommand::GetManufacturerName).await
    }

    async fn get_model_number(&self) -> Result<String> {
        self.query(DeviceCommand::GetModelNumber).await
    }

    async fn get_hardware_revision(&self) -> Result<String> {
        self.query(DeviceCommand::GetHardwareRevision).await
    }

    async fn get_firmware_revision(&self) -> Result<String> {
        self.query(DeviceCommand::GetFirmwareRevision).await
    }

    async fn get_software_revision(&self) -> Result<String> {
        self.query(DeviceCommand::GetSoftwareRevision).await
    }

    async fn get_mac_address(&self) -> Result<String> {
        self.query(DeviceCommand::GetMacAddress).await
    }

    async fn get_serial_number(&self) -> Result<String> {
        self.query(DeviceCommand::GetSerialNumber).await
    }

    async fn get_chip_id(&self) -> Result<String> {
        self.query(DeviceCommand::GetChipId).await
    }

    async fn get_device_name(&self) -> Result<String> {
        self.query(DeviceCommand::GetDeviceName).await
    }

    async fn get_system_id(&self) -> Result<String> {
        self.query(DeviceCommand::GetSystemId).await
    }

    async fn get_pnp_id(&self) -> Result<String> {
        self.query(DeviceCommand::GetPnpId).await
    }

    async fn get_ieee_11073_20601(&self) -> Result<String> {
        self.query(DeviceCommand::GetIeee11073).await
    }

    async fn get_battery_level(&self) -> Result<u8> {
        self.query(DeviceCommand::GetBatteryLevel).await
    }

    async fn get_key_state(&self) -> Result<bool> {
        self.query(DeviceCommand::GetKeyState).await
    }

    async fn get_use_count(&self) -> Result<u16> {
        self.query(DeviceCommand::GetUseCount).await
    }

    async fn reset_use_count(&self) -> Result<()> {
        self.act(DeviceCommand::ResetUseCount).await
    }

    async fn get_buttons_status(&self) -> Result<u8> {
        self.query(DeviceCommand::GetButtonsStatus).await
    }

    async fn get_temperature_and_pressure(&self) -> Result<(f64, f64)> {
        self.query(DeviceCommand::GetTemperatureAndPressure).await
    }

    async fn get_temperature(&self) -> Result<f64> {
        self.query(DeviceCommand::GetTemperature).await
    }

    async fn get_pressure(&self) -> Result<f64> {
        self.query(DeviceCommand::GetPressure).await
    }

    async fn get_accelerometer(&self) -> Result<(u16, u16, u16)> {
        self.query(DeviceCommand::GetAccelerometer).await
    }

    async fn get_accelerometer_x(&self) -> Result<u16> {
        self.query(DeviceCommand::GetAccelerometerX).await
    }

    async fn get_accelerometer_y(&self) -> Result<u16> {
        self.query(DeviceCommand::GetAccelerometerY).await
    }

    async fn get_accelerometer_z(&self) -> Result<u16> {
        self.query(DeviceCommand::GetAccelerometerZ).await
    }

    async fn get_depth(&self) -> Result<u16> {
        self.query(DeviceCommand::GetDepth).await
    }

    async fn get_rotation_speed(&self) -> Result<u16> {
        self.query(DeviceCommand::GetRotationSpeed).await
    }

    async fn get_wake_up(&self) -> Result<bool> {
        self.query(DeviceCommand::GetWakeUp).await
    }

    async fn enable_wake_up(&self) -> Result<()> {
        self.act(DeviceCommand::EnableWakeUp).await
    }

    async fn disable_wake_up(&self) -> Result<()> {
        self.act(DeviceCommand::DisableWakeUp).await
    }

    async fn get_vibration_setting(&self) -> Result<Vec<u8>> {
        self.query(DeviceCommand::GetVibrationSetting).await
    }

    async fn set_vibration_setting(&self, values: &[u8]) -> Result<()> {
        validate_vibration_setting(values)?;
        self.act(DeviceCommand::SetVibrationSetting(values.to_vec()))
            .await
    }

    async fn get_cruise_control(&self) -> Result<bool> {
        self.query(DeviceCommand::GetCruiseControl).await
    }

    async fn enable_cruise_control(&self, reset: bool) -> Result<()> {
        self.act(DeviceCommand::EnableCruiseControl { reset }).await
    }

    async fn disable_cruise_control(&self) -> Result<()> {
        self.act(DeviceCommand::DisableCruiseControl).await
    }

    async fn stop_motors(&self) -> Result<()> {
        self.act(DeviceCommand::StopMotors).await
    }

    async fn verify_accelerometer(&self) -> Result<()> {
        self.act(DeviceCommand::VerifyAccelerometer).await
    }

    async fn get_motors_speed(&self) -> Result<(u8, u8)> {
        self.query(DeviceCommand::GetMotorsSpeed).await
    }

    async fn get_main_motor_speed(&self) -> Result<u8> {
        self.query(DeviceCommand::GetMainMotorSpeed).await
    }

    async fn get_vibration_speed(&self) -> Result<u8> {
        self.query(DeviceCommand::GetVibrationSpeed).await
    }

    async fn set_motors_speed(&self, main: u8, vibration: u8) -> Result<()> {
        validate_speed(main)?;
        validate_speed(vibration)?;
        self.act(DeviceCommand::SetMotorsSpeed { main, vibration })
            .await
    }

    async fn set_main_motor_speed(&self, value: u8) -> Result<()> {
        validate_speed(value)?;
        self.act(DeviceCommand::SetMainMotorSpeed(value)).await
    }

    async fn set_vibration_speed(&self, value: u8) -> Result<()> {
        validate_speed(value)?;
        self.act(DeviceCommand::SetVibrationSpeed(value)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mock::MockBackend,
        proxy::server::{AuthorizationHandler, ClientSession, ProxyServer},
        registers,
        session::DeviceSession,
    };
    use std::{sync::Arc, time::Duration};
    use tokio::net::TcpListener;
    use tokio_test::assert_ok;

    struct Operator(bool);

    #[async_trait]
    impl AuthorizationHandler for Operator {
        async fn authorize(&self, _client: &ClientSession, _arguments: &[Value]) -> bool {
            self.0
        }
    }

    fn fast_config(port: u16) -> ProxyConfig {
        ProxyConfig {
            host: "127.0.0.1".to_string(),
            port,
            accept_poll_ms: 50,
            receive_poll_ms: 50,
            response_timeout_ms: 2_000,
            ..ProxyConfig::default()
        }
    }

    async fn start_server(granted: bool) -> (Arc<MockBackend>, Arc<ProxyServer>, ProxyConfig) {
        let mock = Arc::new(
            MockBackend::new()
                .with_register(registers::MODEL_NUMBER.address, b"F1s")
                .with_register(registers::KEY_STATE.address, &[0x01])
                .with_register(registers::BATTERY_LEVEL.address, &[87])
                .with_register(registers::MOTOR_SPEED.address, &[0x01, 10, 20]),
        );
        let session = Arc::new(DeviceSession::new(mock.clone()));
        session
            .connect("AA:BB:CC:DD:EE:FF", Duration::from_secs(1))
            .await
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = fast_config(listener.local_addr().unwrap().port());
        let server = Arc::new(
            ProxyServer::new(session, config.clone())
                .with_authorization_handler(Arc::new(Operator(granted))),
        );
        tokio::spawn(Arc::clone(&server).run_with_listener(listener));
        (mock, server, config)
    }

    async fn wait_for_clients(server: &ProxyServer, count: usize) {
        for _ in 0..100 {
            if server.active_clients().await.len() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("server never reached {count} client(s)");
    }

    #[tokio::test]
    async fn test_end_to_end_over_tcp() {
        let (mock, server, config) = start_server(true).await;
        let client = ProxyClient::new(config);
        assert_ok!(client.connect().await);
        assert!(client.is_connected().await);

        let err = client.get_battery_level().await.unwrap_err();
        assert!(matches!(err, F1Error::Remote(ref m) if m.contains("not authorized")), "{err}");
        assert!(!client.is_authorized().await.unwrap());

        assert!(client.request_remote_authorization().await.unwrap());
        assert_eq!(
            client.get_remote_authorization().await.unwrap(),
            RemoteAuthorization::Authorized
        );
        assert!(client.is_authorized().await.unwrap());
        assert!(client.get_remote_connected().await.unwrap());

        assert_eq!(client.get_battery_level().await.unwrap(), 87);
        client.set_vibration_speed(60).await.unwrap();
        assert_eq!(client.get_motors_speed().await.unwrap(), (10, 60));
        assert_eq!(
            mock.writes_to(registers::MOTOR_SPEED.address),
            vec![vec![0x01, 10, 60]]
        );

        client.set_name("desk").await.unwrap();
        assert_eq!(server.active_clients().await[0].display_name(), "desk");

        client.lock().await.unwrap();
        assert!(server.is_locked().await);
        client.unlock().await.unwrap();

        client.disconnect().await.unwrap();
        assert!(!client.is_connected().await);
        wait_for_clients(&server, 0).await;
        server.stop();
    }

    #[tokio::test]
    async fn test_blocked_client() {
        let (_mock, server, config) = start_server(false).await;
        let client = ProxyClient::new(config);
        client.connect().await.unwrap();

        assert!(!client.request_remote_authorization().await.unwrap());
        assert_eq!(
            client.get_remote_authorization().await.unwrap(),
            RemoteAuthorization::Blocked
        );
        assert!(matches!(
            client.request_remote_authorization().await,
            Err(F1Error::Remote(_))
        ));
        assert!(matches!(
            client.assert_authorized().await,
            Err(F1Error::NotAuthorized(_))
        ));
        server.stop();
    }

    #[tokio::test]
    async fn test_local_validation_and_unsupported_operations() {
        let client = ProxyClient::new(fast_config(1));
        assert!(matches!(
            client.set_main_motor_speed(101).await,
            Err(F1Error::Validation(_))
        ));
        assert!(matches!(
            client.set_vibration_setting(&[0; 7]).await,
            Err(F1Error::Validation(_))
        ));
        assert!(matches!(
            client.get_battery_level().await,
            Err(F1Error::NotConnected)
        ));
        assert!(matches!(
            client.register_access(),
            Err(F1Error::UnsupportedOperation(_))
        ));
        assert!(matches!(
            client.discover().await,
            Err(F1Error::UnsupportedOperation(_))
        ));
        assert!(!client.is_authorized().await.unwrap());
        assert_ok!(client.disconnect().await);
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ProxyConfig {
            response_timeout_ms: 100,
            ..fast_config(listener.local_addr().unwrap().port())
        };
        let silent = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        });

        let client = ProxyClient::new(config);
        assert!(matches!(
            client.connect().await,
            Err(F1Error::Timeout { timeout_ms: 100 })
        ));
        assert!(!client.is_connected().await);
        silent.abort();
    }

    #[tokio::test]
    async fn test_cancelled_call_does_not_leak_its_response() {
        use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = fast_config(listener.local_addr().unwrap().port());
        // Answers the ping at once and everything after it late
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            let mut lines = BufReader::new(reader).lines();
            let mut first = true;
            while let Ok(Some(_)) = lines.next_line().await {
                if !first {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                let reply = if first { r#"{"status":"OK","data":"pong"}"# } else { r#"{"status":"OK","data":87}"# };
                first = false;
                if writer.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let client = ProxyClient::new(config);
        client.connect().await.unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_millis(50), client.get_battery_level()).await;
        assert!(cancelled.is_err());

        // The late reply to the battery query must never answer another call
        assert!(!client.is_connected().await);
        assert!(matches!(
            client.get_key_state().await,
            Err(F1Error::NotConnected)
        ));
        server.abort();
    }
}
