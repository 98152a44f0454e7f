//! Wire format of the remote proxy.
//!
//! One JSON object per line in each direction. Requests carry a command name
//! and optional positional arguments; responses carry a status plus either a
//! result or an error message:
//!
//! ```text
//! -> {"command": "set_motors_speed", "arguments": [[40, 10]]}
//! <- {"status": "OK", "data": null}
//! -> {"command": "get_battery_level"}
//! <- {"status": "OK", "data": 87}
//! -> {"command": "reset_use_count"}
//! <- {"status": "ERROR", "message": "Authorization denied: client is not authorized"}
//! ```

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{
    api::{validate_speed, validate_vibration_setting, DeviceApi},
    error::{F1Error, Result},
};

/// A command sent by a proxy peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Command name
    pub command: String,
    /// Positional arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<Value>,
}

impl Request {
    /// Build a request
    #[must_use]
    pub fn new(command: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            arguments,
        }
    }

    /// Parse one received line
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Protocol`] if the line is not a request object.
    pub fn parse(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim())
            .map_err(|e| F1Error::Protocol(format!("Malformed command: {e}")))
    }
}

/// Response status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// Command succeeded
    Ok,
    /// Command failed; see the message
    Error,
}

/// Reply to a [`Request`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Outcome
    pub status: Status,
    /// Result of a successful command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Error description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Response {
    /// Successful response; `null` results carry no data field
    #[must_use]
    pub fn ok(data: Value) -> Self {
        Self {
            status: Status::Ok,
            data: (!data.is_null()).then_some(data),
            message: None,
        }
    }

    /// Error response
    #[must_use]
    pub fn error(error: &F1Error) -> Self {
        Self {
            status: Status::Error,
            data: None,
            message: Some(error.to_string()),
        }
    }

    /// Result carried by this response
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Remote`] with the server's message for `ERROR` responses.
    pub fn into_result(self) -> Result<Value> {
        match self.status {
            Status::Ok => Ok(self.data.unwrap_or(Value::Null)),
            Status::Error => Err(F1Error::Remote(
                self.message
                    .unwrap_or_else(|| "unknown remote error".to_string()),
            )),
        }
    }
}

/// Newline framing shared by the proxy server and client
///
/// Lines that cannot be read (too long, not UTF-8) come out as `Err` items and
/// the stream keeps going; only socket failures end it.
#[derive(Debug, Clone)]
pub struct JsonLineCodec {
    lines: LinesCodec,
}

impl JsonLineCodec {
    /// Codec rejecting lines longer than `max_length` bytes
    #[must_use]
    pub fn new(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }

    fn frame(
        decoded: std::result::Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Result<String>>> {
        match decoded {
            Ok(line) => Ok(line.map(Ok)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Err(F1Error::Protocol(
                "line too long".to_string(),
            )))),
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => Ok(Some(
                Err(F1Error::Protocol(format!("line is not valid UTF-8: {e}"))),
            )),
            Err(LinesCodecError::Io(e)) => Err(e.into()),
        }
    }
}

impl Decoder for JsonLineCodec {
    type Item = Result<String>;
    type Error = F1Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        Self::frame(self.lines.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        Self::frame(self.lines.decode_eof(src))
    }
}

impl Encoder<String> for JsonLineCodec {
    type Error = F1Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<()> {
        self.lines.encode(line, dst).map_err(|e| match e {
            LinesCodecError::Io(e) => F1Error::Io(e),
            LinesCodecError::MaxLineLengthExceeded => {
                F1Error::Protocol("line too long".to_string())
            }
        })
    }
}

/// Lower-case a command name and strip everything but `[a-z0-9_]`
#[must_use]
pub fn normalize_command(command: &str) -> String {
    command
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

/// Commands that may never be forwarded to the device
#[must_use]
pub fn is_forbidden(command: &str) -> bool {
    command.starts_with('_') || command.starts_with("notif")
}

/// Commands answered by the proxy server itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedCommand {
    /// Liveness check, answers `"pong"`
    Ping,
    /// Set the peer display name
    Name,
    /// Close the peer session
    Quit,
    /// Peer authorization status, or `"BLOCKED"`
    Authorized,
    /// Whether the server's session is connected to the device
    Connected,
    /// Ask the operator for control
    Authorize,
    /// Take the control lock
    Lock,
    /// Release the control lock
    Unlock,
}

impl ManagedCommand {
    /// Look up a normalized command name
    #[must_use]
    pub fn parse(command: &str) -> Option<Self> {
        Some(match command {
            "ping" => Self::Ping,
            "name" => Self::Name,
            "quit" => Self::Quit,
            "authorized" => Self::Authorized,
            "connected" => Self::Connected,
            "authorize" => Self::Authorize,
            "lock" => Self::Lock,
            "unlock" => Self::Unlock,
            _ => return None,
        })
    }

    /// Wire name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Name => "name",
            Self::Quit => "quit",
            Self::Authorized => "authorized",
            Self::Connected => "connected",
            Self::Authorize => "authorize",
            Self::Lock => "lock",
            Self::Unlock => "unlock",
        }
    }
}

/// Device operations that can be forwarded over the proxy
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum DeviceCommand {
    IsConnected,
    IsAuthorized,
    GetManufacturerName,
    GetModelNumber,
    GetHardwareRevision,
    GetFirmwareRevision,
    GetSoftwareRevision,
    GetMacAddress,
    GetSerialNumber,
    GetChipId,
    GetDeviceName,
    GetSystemId,
    GetPnpId,
    GetIeee11073,
    GetBatteryLevel,
    GetKeyState,
    GetUseCount,
    ResetUseCount,
    GetButtonsStatus,
    GetTemperatureAndPressure,
    GetTemperature,
    GetPressure,
    GetAccelerometer,
    GetAccelerometerX,
    GetAccelerometerY,
    GetAccelerometerZ,
    GetDepth,
    GetRotationSpeed,
    GetWakeUp,
    EnableWakeUp,
    DisableWakeUp,
    GetVibrationSetting,
    SetVibrationSetting(Vec<u8>),
    GetCruiseControl,
    EnableCruiseControl { reset: bool },
    DisableCruiseControl,
    StopMotors,
    VerifyAccelerometer,
    GetMotorsSpeed,
    GetMainMotorSpeed,
    GetVibrationSpeed,
    SetMotorsSpeed { main: u8, vibration: u8 },
    SetMainMotorSpeed(u8),
    SetVibrationSpeed(u8),
}

impl DeviceCommand {
    /// Wire name
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::IsConnected => "is_connected",
            Self::IsAuthorized => "is_authorized",
            Self::GetManufacturerName => "get_manufacturer_name",
            Self::GetModelNumber => "get_model_number",
            Self::GetHardwareRevision => "get_hardware_revision",
            Self::GetFirmwareRevision => "get_firmware_revision",
            Self::GetSoftwareRevision => "get_software_revision",
            Self::GetMacAddress => "get_mac_address",
            Self::GetSerialNumber => "get_serial_number",
            Self::GetChipId => "get_chip_id",
            Self::GetDeviceName => "get_device_name",
            Self::GetSystemId => "get_system_id",
            Self::GetPnpId => "get_pnp_id",
            Self::GetIeee11073 => "get_ieee_11073_20601",
            Self::GetBatteryLevel => "get_battery_level",
            Self::GetKeyState => "get_key_state",
            Self::GetUseCount => "get_use_count",
            Self::ResetUseCount => "reset_use_count",
            Self::GetButtonsStatus => "get_buttons_status",
            Self::GetTemperatureAndPressure => "get_temperature_and_pressure",
            Self::GetTemperature => "get_temperature",
            Self::GetPressure => "get_pressure",
            Self::GetAccelerometer => "get_accelerometer",
            Self::GetAccelerometerX => "get_accelerometer_x",
            Self::GetAccelerometerY => "get_accelerometer_y",
            Self::GetAccelerometerZ => "get_accelerometer_z",
            Self::GetDepth => "get_depth",
            Self::GetRotationSpeed => "get_rotation_speed",
            Self::GetWakeUp => "get_wake_up",
            Self::EnableWakeUp => "enable_wake_up",
            Self::DisableWakeUp => "disable_wake_up",
            Self::GetVibrationSetting => "get_vibration_setting",
            Self::SetVibrationSetting(_) => "set_vibration_setting",
            Self::GetCruiseControl => "get_cruise_control",
            Self::EnableCruiseControl { .. } => "enable_cruise_control",
            Self::DisableCruiseControl => "disable_cruise_control",
            Self::StopMotors => "stop_motors",
            Self::VerifyAccelerometer => "verify_accelerometer",
            Self::GetMotorsSpeed => "get_motors_speed",
            Self::GetMainMotorSpeed => "get_main_motor_speed",
            Self::GetVibrationSpeed => "get_vibration_speed",
            Self::SetMotorsSpeed { .. } => "set_motors_speed",
            Self::SetMainMotorSpeed(_) => "set_main_motor_speed",
            Self::SetVibrationSpeed(_) => "set_vibration_speed",
        }
    }

    /// Positional arguments sent on the wire
    #[must_use]
    pub fn arguments(&self) -> Vec<Value> {
        match self {
            Self::SetVibrationSetting(values) => vec![json!(values)],
            Self::EnableCruiseControl { reset } => vec![json!(reset)],
            Self::SetMotorsSpeed { main, vibration } => vec![json!([main, vibration])],
            Self::SetMainMotorSpeed(value) | Self::SetVibrationSpeed(value) => vec![json!(value)],
            _ => Vec::new(),
        }
    }

    /// Build a command from a normalized name and its arguments
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Protocol`] for unknown commands or wrongly shaped
    /// arguments, and [`F1Error::Validation`] for out-of-range values.
    pub fn parse(command: &str, arguments: &[Value]) -> Result<Self> {
        let parsed = match command {
            "set_vibration_setting" => {
                let values = match arguments {
                    [Value::Array(values)] => values.as_slice(),
                    values => values,
                };
                let settings = values
                    .iter()
                    .map(|value| byte_argument(command, value))
                    .collect::<Result<Vec<_>>>()?;
                validate_vibration_setting(&settings)?;
                return Ok(Self::SetVibrationSetting(settings));
            }
            "enable_cruise_control" => {
                let reset = match arguments {
                    [] => false,
                    [Value::Bool(reset)] => *reset,
                    _ => return Err(bad_arguments(command, "expected an optional boolean")),
                };
                return Ok(Self::EnableCruiseControl { reset });
            }
            "set_motors_speed" => {
                let (main, vibration) = match arguments {
                    [Value::Array(pair)] if pair.len() == 2 => (&pair[0], &pair[1]),
                    [main, vibration] => (main, vibration),
                    _ => return Err(bad_arguments(command, "expected [main, vibration]")),
                };
                let main = byte_argument(command, main)?;
                let vibration = byte_argument(command, vibration)?;
                validate_speed(main)?;
                validate_speed(vibration)?;
                return Ok(Self::SetMotorsSpeed { main, vibration });
            }
            "set_main_motor_speed" | "set_vibration_speed" => {
                let [value] = arguments else {
                    return Err(bad_arguments(command, "expected a single speed"));
                };
                let value = byte_argument(command, value)?;
                validate_speed(value)?;
                return Ok(if command == "set_main_motor_speed" {
                    Self::SetMainMotorSpeed(value)
                } else {
                    Self::SetVibrationSpeed(value)
                });
            }
            "is_connected" => Self::IsConnected,
            "is_authorized" => Self::IsAuthorized,
            "get_manufacturer_name" => Self::GetManufacturerName,
            "get_model_number" => Self::GetModelNumber,
            "get_hardware_revision" => Self::GetHardwareRevision,
            "get_firmware_revision" => Self::GetFirmwareRevision,
            "get_software_revision" => Self::GetSoftwareRevision,
            "get_mac_address" => Self::GetMacAddress,
            "get_serial_number" => Self::GetSerialNumber,
            "get_chip_id" => Self::GetChipId,
            "get_device_name" => Self::GetDeviceName,
            "get_system_id" => Self::GetSystemId,
            "get_pnp_id" => Self::GetPnpId,
            "get_ieee_11073_20601" => Self::GetIeee11073,
            "get_battery_level" => Self::GetBatteryLevel,
            "get_key_state" => Self::GetKeyState,
            "get_use_count" => Self::GetUseCount,
            "reset_use_count" => Self::ResetUseCount,
            "get_buttons_status" => Self::GetButtonsStatus,
            "get_temperature_and_pressure" => Self::GetTemperatureAndPressure,
            "get_temperature" => Self::GetTemperature,
            "get_pressure" => Self::GetPressure,
            "get_accelerometer" => Self::GetAccelerometer,
            "get_accelerometer_x" => Self::GetAccelerometerX,
            "get_accelerometer_y" => Self::GetAccelerometerY,
            "get_accelerometer_z" => Self::GetAccelerometerZ,
            "get_depth" => Self::GetDepth,
            "get_rotation_speed" => Self::GetRotationSpeed,
            "get_wake_up" => Self::GetWakeUp,
            "enable_wake_up" => Self::EnableWakeUp,
            "disable_wake_up" => Self::DisableWakeUp,
            "get_vibration_setting" => Self::GetVibrationSetting,
            "get_cruise_control" => Self::GetCruiseControl,
            "disable_cruise_control" => Self::DisableCruiseControl,
            "stop_motors" => Self::StopMotors,
            "verify_accelerometer" => Self::VerifyAccelerometer,
            "get_motors_speed" => Self::GetMotorsSpeed,
            "get_main_motor_speed" => Self::GetMainMotorSpeed,
            "get_vibration_speed" => Self::GetVibrationSpeed,
            other => return Err(F1Error::Protocol(format!("Unknown command {other}"))),
        };

        if arguments.is_empty() {
            Ok(parsed)
        } else {
            Err(bad_arguments(command, "takes no arguments"))
        }
    }

    /// Run the command against a device and encode its result
    ///
    /// # Errors
    ///
    /// Returns whatever the underlying device operation returns.
    pub async fn execute(&self, device: &dyn DeviceApi) -> Result<Value> {
        Ok(match self {
            Self::IsConnected => json!(device.is_connected().await),
            Self::IsAuthorized => json!(device.is_authorized().await?),
            Self::GetManufacturerName => json!(device.get_manufacturer_name().await?),
            Self::GetModelNumber => json!(device.get_model_number().await?),
            Self::GetHardwareRevision => json!(device.get_hardware_revision().await?),
            Self::GetFirmwareRevision => json!(device.get_firmware_revision().await?),
            Self::GetSoftwareRevision => json!(device.get_software_revision().await?),
            Self::GetMacAddress => json!(device.get_mac_address().await?),
            Self::GetSerialNumber => json!(device.get_serial_number().await?),
            Self::GetChipId => json!(device.get_chip_id().await?),
            Self::GetDeviceName => json!(device.get_device_name().await?),
            Self::GetSystemId => json!(device.get_system_id().await?),
            Self::GetPnpId => json!(device.get_pnp_id().await?),
            Self::GetIeee11073 => json!(device.get_ieee_11073_20601().await?),
            Self::GetBatteryLevel => json!(device.get_battery_level().await?),
            Self::GetKeyState => json!(device.get_key_state().await?),
            Self::GetUseCount => json!(device.get_use_count().await?),
            Self::GetButtonsStatus => json!(device.get_buttons_status().await?),
            Self::GetTemperatureAndPressure => {
                let (temperature, pressure) = device.get_temperature_and_pressure().await?;
                json!([temperature, pressure])
            }
            Self::GetTemperature => json!(device.get_temperature().await?),
            Self::GetPressure => json!(device.get_pressure().await?),
            Self::GetAccelerometer => {
                let (x, y, z) = device.get_accelerometer().await?;
                json!([x, y, z])
            }
            Self::GetAccelerometerX => json!(device.get_accelerometer_x().await?),
            Self::GetAccelerometerY => json!(device.get_accelerometer_y().await?),
            Self::GetAccelerometerZ => json!(device.get_accelerometer_z().await?),
            Self::GetDepth => json!(device.get_depth().await?),
            Self::GetRotationSpeed => json!(device.get_rotation_speed().await?),
            Self::GetWakeUp => json!(device.get_wake_up().await?),
            Self::GetVibrationSetting => json!(device.get_vibration_setting().await?),
            Self::GetCruiseControl => json!(device.get_cruise_control().await?),
            Self::GetMotorsSpeed => {
                let (main, vibration) = device.get_motors_speed().await?;
                json!([main, vibration])
            }
            Self::GetMainMotorSpeed => json!(device.get_main_motor_speed().await?),
            Self::GetVibrationSpeed => json!(device.get_vibration_speed().await?),
            Self::ResetUseCount => {
                device.reset_use_count().await?;
                Value::Null
            }
            Self::EnableWakeUp => {
                device.enable_wake_up().await?;
                Value::Null
            }
            Self::DisableWakeUp => {
                device.disable_wake_up().await?;
                Value::Null
            }
            Self::SetVibrationSetting(values) => {
                device.set_vibration_setting(values).await?;
                Value::Null
            }
            Self::EnableCruiseControl { reset } => {
                device.enable_cruise_control(*reset).await?;
                Value::Null
            }
            Self::DisableCruiseControl => {
                device.disable_cruise_control().await?;
                Value::Null
            }
            Self::StopMotors => {
                device.stop_motors().await?;
                Value::Null
            }
            Self::VerifyAccelerometer => {
                device.verify_accelerometer().await?;
                Value::Null
            }
            Self::SetMotorsSpeed { main, vibration } => {
                device.set_motors_speed(*main, *vibration).await?;
                Value::Null
            }
            Self::SetMainMotorSpeed(value) => {
                device.set_main_motor_speed(*value).await?;
                Value::Null
            }
            Self::SetVibrationSpeed(value) => {
                device.set_vibration_speed(*value).await?;
                Value::Null
            }
        })
    }
}

fn bad_arguments(command: &str, reason: &str) -> F1Error {
    F1Error::Protocol(format!("Invalid arguments for {command}: {reason}"))
}

fn byte_argument(command: &str, value: &Value) -> Result<u8> {
    let number = value
        .as_u64()
        .ok_or_else(|| bad_arguments(command, &format!("{value} is not a non-negative integer")))?;
    u8::try_from(number)
        .map_err(|_| F1Error::Validation(format!("{number} is out of range for {command}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_command() {
        assert_eq!(normalize_command("Get_Battery-Level!"), "get_batterylevel");
        assert_eq!(normalize_command("  PING\n"), "ping");
        assert_eq!(normalize_command("__init__"), "__init__");
    }

    #[test]
    fn test_forbidden_prefixes() {
        assert!(is_forbidden("_disconnect"));
        assert!(is_forbidden("notify_buttons"));
        assert!(is_forbidden("notif"));
        assert!(!is_forbidden("get_battery_level"));
    }

    #[test]
    fn test_codec_survives_unreadable_lines() {
        let mut codec = JsonLineCodec::new(16);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"{\"command\":\"\xff\"}\n");
        buf.extend_from_slice(&[b'a'; 40]);
        buf.extend_from_slice(b"\n{\"command\":1}\n");

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(first, Err(F1Error::Protocol(ref m)) if m.contains("UTF-8")));
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(second, Err(F1Error::Protocol(ref m)) if m.contains("too long")));
        let third = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(third.unwrap(), r#"{"command":1}"#);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_request_wire_shape() {
        let request = Request::new("get_battery_level", Vec::new());
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"command":"get_battery_level"}"#
        );

        let parsed = Request::parse(r#"{"command": "name", "arguments": ["desk"]}"#).unwrap();
        assert_eq!(parsed.arguments, vec![json!("desk")]);

        assert!(matches!(Request::parse("not json"), Err(F1Error::Protocol(_))));
        assert!(matches!(Request::parse(r#"{"arguments": []}"#), Err(F1Error::Protocol(_))));
    }

    #[test]
    fn test_response_wire_shape() {
        assert_eq!(
            serde_json::to_string(&Response::ok(json!(87))).unwrap(),
            r#"{"status":"OK","data":87}"#
        );
        assert_eq!(
            serde_json::to_string(&Response::ok(Value::Null)).unwrap(),
            r#"{"status":"OK"}"#
        );
        let error = Response::error(&F1Error::NotConnected);
        assert_eq!(
            serde_json::to_string(&error).unwrap(),
            r#"{"status":"ERROR","message":"Client is not connected"}"#
        );
        assert!(matches!(error.into_result(), Err(F1Error::Remote(m)) if m == "Client is not connected"));
    }

    #[test]
    fn test_parse_device_commands() {
        assert_eq!(
            DeviceCommand::parse("get_battery_level", &[]).unwrap(),
            DeviceCommand::GetBatteryLevel
        );
        assert_eq!(
            DeviceCommand::parse("set_motors_speed", &[json!([40, 10])]).unwrap(),
            DeviceCommand::SetMotorsSpeed { main: 40, vibration: 10 }
        );
        assert_eq!(
            DeviceCommand::parse("set_motors_speed", &[json!(40), json!(10)]).unwrap(),
            DeviceCommand::SetMotorsSpeed { main: 40, vibration: 10 }
        );
        assert_eq!(
            DeviceCommand::parse("enable_cruise_control", &[]).unwrap(),
            DeviceCommand::EnableCruiseControl { reset: false }
        );
        assert_eq!(
            DeviceCommand::parse("set_vibration_setting", &[json!([1, 2, 3, 4, 5, 6, 7, 8])])
                .unwrap(),
            DeviceCommand::SetVibrationSetting(vec![1, 2, 3, 4, 5, 6, 7, 8])
        );
    }

    #[test]
    fn test_parse_rejects_bad_commands() {
        assert!(matches!(
            DeviceCommand::parse("self_destruct", &[]),
            Err(F1Error::Protocol(_))
        ));
        assert!(matches!(
            DeviceCommand::parse("get_battery_level", &[json!(1)]),
            Err(F1Error::Protocol(_))
        ));
        assert!(matches!(
            DeviceCommand::parse("set_main_motor_speed", &[json!(101)]),
            Err(F1Error::Validation(_))
        ));
        assert!(matches!(
            DeviceCommand::parse("set_main_motor_speed", &[json!(-1)]),
            Err(F1Error::Protocol(_))
        ));
        assert!(matches!(
            DeviceCommand::parse("set_vibration_setting", &[json!([1, 2])]),
            Err(F1Error::Validation(_))
        ));
    }

    #[test]
    fn test_arguments_parse_back() {
        let commands = [
            DeviceCommand::SetMotorsSpeed { main: 5, vibration: 100 },
            DeviceCommand::EnableCruiseControl { reset: true },
            DeviceCommand::SetVibrationSpeed(0),
            DeviceCommand::SetVibrationSetting(vec![0; 8]),
            DeviceCommand::StopMotors,
        ];
        for command in commands {
            let parsed = DeviceCommand::parse(command.name(), &command.arguments()).unwrap();
            assert_eq!(parsed, command);
        }
    }

    #[test]
    fn test_managed_commands() {
        for name in ["ping", "name", "quit", "authorized", "connected", "authorize", "lock", "unlock"] {
            assert_eq!(ManagedCommand::parse(name).map(ManagedCommand::name), Some(name));
        }
        assert_eq!(ManagedCommand::parse("get_battery_level"), None);
    }
}
