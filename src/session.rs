use async_trait::async_trait;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, RwLock},
    time::Instant,
};
use tracing::{debug, error, info, warn};

use crate::{
    api::{validate_speed, validate_vibration_setting, DeviceApi, RegisterAccess},
    ble::BleBackend,
    error::{F1Error, Result},
    notifications::{NotificationDispatcher, NotificationListener, SubscriptionHandle},
    registers::{self, hex_string, Register, RegisterValue},
    transport::TransportBackend,
    types::{
        cruise_control, ConnectionProfile, DiscoveredDevice, ProtocolVersion, SessionConfig,
        SessionState,
    },
    ADVERTISING_DEVICE_NAMES,
};

/// Security access value reported once the device has granted access
pub const SECURITY_ACCESS_GRANTED: [u8; 8] = [1, 0, 0, 0, 0, 0, 0, 0];

#[derive(Debug, Clone)]
struct ConnectedDevice {
    address: String,
    model_number: Option<String>,
}

/// A connection to one F1s device
///
/// `DeviceSession` owns a [`TransportBackend`] and drives the connection state
/// machine: connect with retry, protocol version detection, the authorization
/// check (including the version 2 security handshake), register I/O and
/// notification subscriptions.
///
/// # Examples
///
/// ```no_run
/// use lelof1::{DeviceApi, DeviceSession};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let session = DeviceSession::with_ble().await?;
///     let found = session.discover(session.config().discover_timeout(), None).await?;
///     let device = found.first().ok_or("no F1s nearby")?;
///
///     session.connect(&device.address, session.config().connect_timeout()).await?;
///     println!("Battery: {}%", session.get_battery_level().await?);
///
///     if session.is_authorized().await? {
///         session.set_motors_speed(30, 10).await?;
///     }
///     session.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct DeviceSession {
    backend: Arc<dyn TransportBackend>,
    dispatcher: NotificationDispatcher,
    config: SessionConfig,
    state: RwLock<SessionState>,
    protocol_version: RwLock<ProtocolVersion>,
    handshake_done: Mutex<bool>,
    device: RwLock<Option<ConnectedDevice>>,
    authorization_check: AtomicBool,
}

impl DeviceSession {
    /// Create a session over a backend with default settings
    #[must_use]
    pub fn new(backend: Arc<dyn TransportBackend>) -> Self {
        Self::with_config(backend, SessionConfig::default())
    }

    /// Create a session over a backend
    #[must_use]
    pub fn with_config(backend: Arc<dyn TransportBackend>, config: SessionConfig) -> Self {
        Self {
            dispatcher: NotificationDispatcher::new(Arc::clone(&backend)),
            backend,
            authorization_check: AtomicBool::new(config.authorization_check),
            config,
            state: RwLock::new(SessionState::Disconnected),
            protocol_version: RwLock::new(ProtocolVersion::V1),
            handshake_done: Mutex::new(false),
            device: RwLock::new(None),
        }
    }

    /// Create a session on the first Bluetooth adapter
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Ble`] or [`F1Error::Transport`] if no adapter is usable.
    pub async fn with_ble() -> Result<Self> {
        Ok(Self::new(Arc::new(BleBackend::new().await?)))
    }

    /// Session configuration
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current state
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Protocol version detected at connect time
    pub async fn protocol_version(&self) -> ProtocolVersion {
        *self.protocol_version.read().await
    }

    /// Address of the connected device
    pub async fn connected_address(&self) -> Option<String> {
        self.device.read().await.as_ref().map(|d| d.address.clone())
    }

    /// Identity of the connected device, suitable for [`ProfileStore`](crate::ProfileStore)
    pub async fn connection_profile(&self) -> Option<ConnectionProfile> {
        self.device
            .read()
            .await
            .as_ref()
            .map(|device| ConnectionProfile {
                address: device.address.clone(),
                protocol_identifier: device.model_number.clone(),
                display_name: device.model_number.clone(),
            })
    }

    /// Require device authorization before control commands
    pub fn enable_authorization_check(&self) {
        self.authorization_check.store(true, Ordering::Release);
    }

    /// Skip the device authorization check before control commands
    pub fn disable_authorization_check(&self) {
        self.authorization_check.store(false, Ordering::Release);
    }

    /// Scan until a matching device shows up or the deadline elapses.
    ///
    /// With a `target` address only that device matches; otherwise devices
    /// advertising one of [`ADVERTISING_DEVICE_NAMES`] do. Returns the matches
    /// of the first round that found any, or an empty list.
    ///
    /// # Errors
    ///
    /// Returns the last scan error if no scan round succeeded before the deadline.
    pub async fn discover(
        &self,
        deadline: Duration,
        target: Option<&str>,
    ) -> Result<Vec<DiscoveredDevice>> {
        let start = Instant::now();
        let mut last_error = None;
        let mut any_round_succeeded = false;

        loop {
            debug!("Discovering nearby devices");
            match self.backend.scan(self.config.scan_window()).await {
                Ok(devices) => {
                    any_round_succeeded = true;
                    debug!("Found {} nearby device(s)", devices.len());
                    let found: Vec<_> = devices
                        .into_iter()
                        .filter(|device| match target {
                            Some(address) => device.address.eq_ignore_ascii_case(address),
                            None => device
                                .name
                                .as_deref()
                                .is_some_and(|name| ADVERTISING_DEVICE_NAMES.contains(&name)),
                        })
                        .collect();
                    if !found.is_empty() {
                        for device in &found {
                            info!(
                                "Discovery found {} ({})",
                                device.address,
                                device.name.as_deref().unwrap_or("unnamed")
                            );
                        }
                        return Ok(found);
                    }
                }
                Err(e) => {
                    debug!("Scan round failed: {e}");
                    last_error = Some(e);
                }
            }

            if start.elapsed() >= deadline {
                break;
            }
            tokio::time::sleep(self.config.connect_retry_interval()).await;
        }

        debug!("Discovery took {}ms", start.elapsed().as_millis());
        match last_error {
            Some(e) if !any_round_succeeded => Err(e),
            _ => Ok(Vec::new()),
        }
    }

    /// Connect to the device at `address`, retrying until `deadline`.
    ///
    /// Attempts are spaced by the configured retry interval. Once the link is
    /// up the model number is read to detect the protocol version, the device
    /// is profiled (best effort) and a liveness read is issued.
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Validation`] for an empty address,
    /// [`F1Error::InvalidState`] if the session is not disconnected, the error of
    /// the last connect attempt when the deadline expires, or the error of the
    /// post-connect reads.
    pub async fn connect(&self, address: &str, deadline: Duration) -> Result<()> {
        if address.is_empty() {
            return Err(F1Error::Validation(
                "Address is required. Please provide the MAC address of the target device"
                    .to_string(),
            ));
        }
        self.transition(SessionState::Connecting).await?;

        info!("Connecting to device {address}");
        let start = Instant::now();
        let mut attempt = 0_u32;
        let outcome = loop {
            attempt += 1;
            debug!("Connection attempt #{attempt} to {address}");
            match self.backend.connect(address).await {
                Ok(()) => break Ok(()),
                Err(e) => {
                    debug!("Connection attempt #{attempt} failed: {e}");
                    if start.elapsed() >= deadline {
                        warn!("Connection to {address} timed out after {attempt} attempt(s)");
                        break Err(e);
                    }
                    tokio::time::sleep(self.config.connect_retry_interval()).await;
                }
            }
        };

        if let Err(e) = outcome {
            self.force_state(SessionState::Disconnected).await;
            return Err(e);
        }

        info!("Successfully connected to device {address}");
        *self.handshake_done.lock().await = false;
        *self.device.write().await = Some(ConnectedDevice {
            address: address.to_string(),
            model_number: None,
        });
        self.transition(SessionState::Connected).await?;

        if let Err(e) = self.after_connect().await {
            error!("Post-connect checks failed: {e}");
            if let Err(teardown) = self.teardown().await {
                warn!("Failed to release the link: {teardown}");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Reconnect to the device of a saved profile
    ///
    /// # Errors
    ///
    /// See [`DeviceSession::connect`].
    pub async fn connect_profile(&self, profile: &ConnectionProfile) -> Result<()> {
        self.connect(&profile.address, self.config.connect_timeout())
            .await
    }

    async fn after_connect(&self) -> Result<()> {
        let model = self.read_text(&registers::MODEL_NUMBER).await?;
        let version = ProtocolVersion::from_model_number(&model);
        info!("Device model {model}, protocol {version}");
        *self.protocol_version.write().await = version;
        if let Some(device) = self.device.write().await.as_mut() {
            device.model_number = Some(model);
        }

        if self.config.profile_on_connect {
            debug!("Profiling the device");
            if let Err(e) = self.profile_device().await {
                warn!("Error profiling device: {e}");
            }
        }

        debug!("Verifying communication layer");
        DeviceApi::ping(self).await
    }

    /// Log every characteristic and every register value of the device
    async fn profile_device(&self) -> Result<()> {
        let characteristics = self.backend.enumerate().await?;
        for characteristic in &characteristics {
            let value = if characteristic.readable {
                match self.backend.read(&characteristic.uuid).await {
                    Ok(raw) => hex_string(&raw),
                    Err(e) => format!("cannot read: {e}"),
                }
            } else {
                "not readable".to_string()
            };
            debug!(
                "Service {} characteristic {} = [{value}]",
                characteristic.service, characteristic.uuid
            );
        }

        for register in registers::ALL.iter().filter(|r| r.is_readable()) {
            if !characteristics.iter().any(|c| register.matches(&c.uuid)) {
                debug!(target: "lelof1::io", "REGISTER {} {} not exposed", register.address, register.name);
                continue;
            }
            let value = match self.backend.read(register.address).await {
                Ok(raw) => hex_string(&raw),
                Err(e) => format!("cannot read: {e}"),
            };
            debug!(target: "lelof1::io", "REGISTER {} {} = [{value}]", register.address, register.name);
        }
        Ok(())
    }

    async fn transition(&self, next: SessionState) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.can_transition_to(next) {
            return Err(F1Error::InvalidState(format!(
                "cannot move from {} to {next}",
                *state
            )));
        }
        debug!("Session state {} -> {next}", *state);
        *state = next;
        Ok(())
    }

    async fn try_transition(&self, next: SessionState) {
        let mut state = self.state.write().await;
        if *state != next && state.can_transition_to(next) {
            debug!("Session state {} -> {next}", *state);
            *state = next;
        }
    }

    async fn force_state(&self, next: SessionState) {
        *self.state.write().await = next;
    }

    async fn assert_connected(&self) -> Result<()> {
        if self.state.read().await.is_connected() {
            Ok(())
        } else {
            Err(F1Error::NotConnected)
        }
    }

    async fn teardown(&self) -> Result<()> {
        info!("Disconnecting from device");
        let result = self.backend.disconnect().await;
        self.force_state(SessionState::Disconnected).await;
        *self.device.write().await = None;
        info!("Disconnected from device");
        result
    }

    async fn on_io_failure(&self, error: &F1Error) {
        if error.is_connection_error() && !self.backend.is_connected().await {
            error!("Link to the device was lost: {error}");
            let removed = self.dispatcher.unregister_all().await;
            debug!("Dropped {removed} subscription(s) after link loss");
            self.force_state(SessionState::Disconnected).await;
            *self.device.write().await = None;
        }
    }

    async fn read_register(&self, register: &'static Register) -> Result<RegisterValue> {
        self.assert_connected().await?;
        if !register.is_readable() {
            return Err(F1Error::UnsupportedOperation(format!(
                "register {} cannot be read",
                register.name
            )));
        }

        debug!(target: "lelof1::io", "READING {} {}", register.address, register.name);
        let raw = match self.backend.read(register.address).await {
            Ok(raw) => raw,
            Err(e) => {
                self.on_io_failure(&e).await;
                return Err(e);
            }
        };
        let value = register.from_device(&raw)?;
        debug!(target: "lelof1::io", "READ {} {} >> {:?}", register.address, register.name, value);
        Ok(value)
    }

    async fn write_register(&self, register: &'static Register, value: &RegisterValue) -> Result<()> {
        self.assert_connected().await?;
        let raw = register.to_device(value)?;

        info!(target: "lelof1::io", "WRITE {} {} << {:02X?}", register.address, register.name, raw);
        if let Err(e) = self.backend.write(register.address, &raw).await {
            error!(target: "lelof1::io", "Error writing to {} {}: {e}", register.address, register.name);
            self.on_io_failure(&e).await;
            return Err(e);
        }
        debug!(target: "lelof1::io", "WRITE {} {} DONE", register.address, register.name);
        Ok(())
    }

    async fn read_text(&self, register: &'static Register) -> Result<String> {
        let value = self.read_register(register).await?;
        value
            .as_text()
            .map(str::to_string)
            .ok_or_else(|| unexpected(register, &value))
    }

    async fn read_number(&self, register: &'static Register) -> Result<u16> {
        let value = self.read_register(register).await?;
        value.as_number().ok_or_else(|| unexpected(register, &value))
    }

    async fn read_byte(&self, register: &'static Register) -> Result<u8> {
        let number = self.read_number(register).await?;
        u8::try_from(number).map_err(|e| F1Error::conversion(register.name, e.to_string()))
    }

    async fn read_flag(&self, register: &'static Register) -> Result<bool> {
        let value = self.read_register(register).await?;
        value.as_flag().ok_or_else(|| unexpected(register, &value))
    }

    async fn read_motors(&self) -> Result<(u8, u8)> {
        let value = self.read_register(&registers::MOTOR_SPEED).await?;
        value
            .as_pair()
            .ok_or_else(|| unexpected(&registers::MOTOR_SPEED, &value))
    }

    async fn read_accelerometer(&self) -> Result<(u16, u16, u16)> {
        let value = self.read_register(&registers::ACCELEROMETER).await?;
        value
            .as_triple()
            .ok_or_else(|| unexpected(&registers::ACCELEROMETER, &value))
    }

    async fn read_climate(&self) -> Result<(f64, f64)> {
        let value = self.read_register(&registers::PRESSURE_TEMPERATURE).await?;
        value
            .as_climate()
            .ok_or_else(|| unexpected(&registers::PRESSURE_TEMPERATURE, &value))
    }

    async fn check_security_access(&self) -> Result<bool> {
        let value = self.read_register(&registers::SECURITY_ACCESS).await?;
        let pattern = value
            .as_bytes()
            .ok_or_else(|| unexpected(&registers::SECURITY_ACCESS, &value))?
            .to_vec();

        if pattern.iter().all(|b| *b == 0) {
            debug!("Security access not granted yet");
            return Ok(false);
        }
        if pattern == SECURITY_ACCESS_GRANTED {
            return Ok(true);
        }

        let answer = {
            let mut done = self.handshake_done.lock().await;
            !std::mem::replace(&mut *done, true)
        };
        if answer {
            info!("Answering security access challenge");
            if let Err(e) = self
                .write_register(&registers::SECURITY_ACCESS, &RegisterValue::Bytes(pattern))
                .await
            {
                warn!("Security access answer failed: {e}");
            }
        } else {
            debug!("Security access challenge already answered on this connection");
        }
        Ok(false)
    }
}

fn unexpected(register: &Register, value: &RegisterValue) -> F1Error {
    F1Error::conversion(register.name, format!("unexpected value {value:?}"))
}

#[async_trait]
impl DeviceApi for DeviceSession {
    fn register_access(&self) -> Result<&dyn RegisterAccess> {
        Ok(self)
    }

    async fn is_connected(&self) -> bool {
        self.state.read().await.is_connected()
    }

    async fn is_authorized(&self) -> Result<bool> {
        self.assert_connected().await?;
        self.try_transition(SessionState::Authorizing).await;

        let version = *self.protocol_version.read().await;
        let result = match version {
            ProtocolVersion::V1 => self.read_flag(&registers::KEY_STATE).await,
            ProtocolVersion::V2 => self.check_security_access().await,
        };

        match result {
            Ok(true) => self.try_transition(SessionState::Ready).await,
            _ => self.try_transition(SessionState::Connected).await,
        }
        result
    }

    async fn assert_authorized(&self) -> Result<()> {
        if !self.authorization_check.load(Ordering::Acquire) {
            debug!("Skipping authorization check because it is disabled");
            return Ok(());
        }
        if self.is_authorized().await? {
            Ok(())
        } else {
            Err(F1Error::NotAuthorized(
                "press the central button to proceed".to_string(),
            ))
        }
    }

    async fn ping(&self) -> Result<()> {
        debug!("Sending ping to device");
        self.read_register(&registers::MODEL_NUMBER).await?;
        debug!("Device responded to ping");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.state.read().await.is_connected() {
            warn!("Session is not connected");
            return Ok(());
        }
        let removed = self.dispatcher.unregister_all().await;
        debug!("Cancelled {removed} subscription(s)");
        self.teardown().await
    }

    async fn shutdown(&self) -> Result<()> {
        self.assert_authorized().await?;
        let removed = self.dispatcher.unregister_all().await;
        debug!("Cancelled {removed} subscription(s)");

        info!("Sending device shutdown signal");
        let result = self
            .write_register(&registers::SHUTDOWN, &RegisterValue::Empty)
            .await;
        let teardown = self.teardown().await;
        result.and(teardown)
    }

    async fn get_manufacturer_name(&self) -> Result<String> {
        self.read_text(&registers::MANUFACTURER_NAME).await
    }

    async fn get_model_number(&self) -> Result<String> {
        self.read_text(&registers::MODEL_NUMBER).await
    }

    async fn get_hardware_revision(&self) -> Result<String> {
        self.read_text(&registers::HARDWARE_REVISION).await
    }

    async fn get_firmware_revision(&self) -> Result<String> {
        self.read_text(&registers::FIRMWARE_REVISION).await
    }

    async fn get_software_revision(&self) -> Result<String> {
        self.read_text(&registers::SOFTWARE_REVISION).await
    }

    async fn get_mac_address(&self) -> Result<String> {
        self.read_text(&registers::MAC_ADDRESS).await
    }

    async fn get_serial_number(&self) -> Result<String> {
        self.read_text(&registers::SERIAL_NUMBER).await
    }

    async fn get_chip_id(&self) -> Result<String> {
        self.read_text(&registers::CHIP_ID).await
    }

    async fn get_device_name(&self) -> Result<String> {
        // The generic access name is not exposed on every platform
        self.read_text(&registers::MODEL_NUMBER).await
    }

    async fn get_system_id(&self) -> Result<String> {
        self.read_text(&registers::DEVICE_INFORMATION_SYSTEM_ID).await
    }

    async fn get_pnp_id(&self) -> Result<String> {
        self.read_text(&registers::DEVICE_INFORMATION_PNP_ID).await
    }

    async fn get_ieee_11073_20601(&self) -> Result<String> {
        self.read_text(&registers::DEVICE_INFORMATION_IEEE11073).await
    }

    async fn get_battery_level(&self) -> Result<u8> {
        self.read_byte(&registers::BATTERY_LEVEL).await
    }

    async fn get_key_state(&self) -> Result<bool> {
        self.read_flag(&registers::KEY_STATE).await
    }

    async fn get_use_count(&self) -> Result<u16> {
        self.assert_authorized().await?;
        self.read_number(&registers::USER_RECORD).await
    }

    async fn reset_use_count(&self) -> Result<()> {
        self.assert_authorized().await?;
        debug!("Resetting use count");
        self.write_register(&registers::USER_RECORD_RESET, &RegisterValue::Empty)
            .await
    }

    async fn get_buttons_status(&self) -> Result<u8> {
        self.assert_authorized().await?;
        self.read_byte(&registers::BUTTON).await
    }

    async fn get_temperature_and_pressure(&self) -> Result<(f64, f64)> {
        self.assert_authorized().await?;
        self.read_climate().await
    }

    async fn get_temperature(&self) -> Result<f64> {
        self.assert_authorized().await?;
        Ok(self.read_climate().await?.0)
    }

    async fn get_pressure(&self) -> Result<f64> {
        self.assert_authorized().await?;
        Ok(self.read_climate().await?.1)
    }

    async fn get_accelerometer(&self) -> Result<(u16, u16, u16)> {
        self.assert_authorized().await?;
        self.read_accelerometer().await
    }

    async fn get_accelerometer_x(&self) -> Result<u16> {
        self.assert_authorized().await?;
        Ok(self.read_accelerometer().await?.0)
    }

    async fn get_accelerometer_y(&self) -> Result<u16> {
        self.assert_authorized().await?;
        Ok(self.read_accelerometer().await?.1)
    }

    async fn get_accelerometer_z(&self) -> Result<u16> {
        self.assert_authorized().await?;
        Ok(self.read_accelerometer().await?.2)
    }

    async fn get_depth(&self) -> Result<u16> {
        self.assert_authorized().await?;
        self.read_number(&registers::LENGTH).await
    }

    async fn get_rotation_speed(&self) -> Result<u16> {
        self.assert_authorized().await?;
        self.read_number(&registers::HALL).await
    }

    async fn get_wake_up(&self) -> Result<bool> {
        self.assert_authorized().await?;
        self.read_flag(&registers::WAKE_UP).await
    }

    async fn enable_wake_up(&self) -> Result<()> {
        self.assert_authorized().await?;
        info!("Setting wake-up to true");
        self.write_register(&registers::WAKE_UP, &RegisterValue::Flag(true))
            .await
    }

    async fn disable_wake_up(&self) -> Result<()> {
        self.assert_authorized().await?;
        info!("Setting wake-up to false");
        self.write_register(&registers::WAKE_UP, &RegisterValue::Flag(false))
            .await
    }

    async fn get_vibration_setting(&self) -> Result<Vec<u8>> {
        self.assert_authorized().await?;
        let value = self.read_register(&registers::VIBRATOR_SETTING).await?;
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| unexpected(&registers::VIBRATOR_SETTING, &value))
    }

    async fn set_vibration_setting(&self, values: &[u8]) -> Result<()> {
        validate_vibration_setting(values)?;
        self.assert_authorized().await?;
        info!("Setting vibration setting to {values:?}");
        self.write_register(
            &registers::VIBRATOR_SETTING,
            &RegisterValue::Bytes(values.to_vec()),
        )
        .await
    }

    async fn get_cruise_control(&self) -> Result<bool> {
        self.assert_authorized().await?;
        self.read_flag(&registers::MOTOR_WORK_ON_TOUCH).await
    }

    async fn enable_cruise_control(&self, reset: bool) -> Result<()> {
        self.assert_authorized().await?;
        let status = if reset {
            cruise_control::ENABLE_AND_RESET
        } else {
            cruise_control::ENABLED
        };
        info!("Setting cruise control to {status}");
        self.write_register(&registers::MOTOR_WORK_ON_TOUCH, &RegisterValue::Number(status))
            .await
    }

    async fn disable_cruise_control(&self) -> Result<()> {
        self.assert_authorized().await?;
        info!("Setting cruise control to {}", cruise_control::DISABLED);
        self.write_register(
            &registers::MOTOR_WORK_ON_TOUCH,
            &RegisterValue::Number(cruise_control::DISABLED),
        )
        .await
    }

    async fn stop_motors(&self) -> Result<()> {
        self.assert_authorized().await?;
        info!("Sending motors stop signal");
        self.write_register(&registers::MOTOR_STOP, &RegisterValue::Empty)
            .await
    }

    async fn verify_accelerometer(&self) -> Result<()> {
        self.assert_authorized().await?;
        info!("Entering accelerometer verification mode");
        self.write_register(&registers::VERIFY_ACCELEROMETER, &RegisterValue::Empty)
            .await
    }

    async fn get_motors_speed(&self) -> Result<(u8, u8)> {
        self.assert_authorized().await?;
        self.read_motors().await
    }

    async fn get_main_motor_speed(&self) -> Result<u8> {
        self.assert_authorized().await?;
        Ok(self.read_motors().await?.0)
    }

    async fn get_vibration_speed(&self) -> Result<u8> {
        self.assert_authorized().await?;
        Ok(self.read_motors().await?.1)
    }

    async fn set_motors_speed(&self, main: u8, vibration: u8) -> Result<()> {
        validate_speed(main)?;
        validate_speed(vibration)?;
        self.assert_authorized().await?;
        info!("Setting motor speed to {main} and vibration speed to {vibration}");
        self.write_register(&registers::MOTOR_SPEED, &RegisterValue::Pair(main, vibration))
            .await
    }

    async fn set_main_motor_speed(&self, value: u8) -> Result<()> {
        validate_speed(value)?;
        self.assert_authorized().await?;
        info!("Setting main motor speed to {value}");
        let (_, vibration) = self.read_motors().await?;
        debug!("Keeping current vibration speed of {vibration}");
        self.write_register(&registers::MOTOR_SPEED, &RegisterValue::Pair(value, vibration))
            .await
    }

    async fn set_vibration_speed(&self, value: u8) -> Result<()> {
        validate_speed(value)?;
        self.assert_authorized().await?;
        info!("Setting vibration speed to {value}");
        let (main, _) = self.read_motors().await?;
        debug!("Keeping current motor speed of {main}");
        self.write_register(&registers::MOTOR_SPEED, &RegisterValue::Pair(main, value))
            .await
    }
}

#[async_trait]
impl RegisterAccess for DeviceSession {
    async fn read(&self, register: &'static Register) -> Result<RegisterValue> {
        self.read_register(register).await
    }

    async fn write(&self, register: &'static Register, value: &RegisterValue) -> Result<()> {
        self.write_register(register, value).await
    }

    async fn subscribe(
        &self,
        register: &'static Register,
        listener: Arc<dyn NotificationListener>,
        distinct_until_changed: bool,
    ) -> Result<SubscriptionHandle> {
        self.assert_connected().await?;
        self.dispatcher
            .subscribe(register, listener, distinct_until_changed)
            .await
    }

    async fn unregister(&self, handle: &SubscriptionHandle) -> Result<()> {
        self.dispatcher.unregister(handle).await
    }
}
