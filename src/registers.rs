//! Register catalog of the F1s.
//!
//! A register is a characteristic address paired with the converters that turn
//! device bytes into a [`RegisterValue`] and back. Either converter may be absent:
//! reading a write-only register or writing a read-only one fails with
//! [`F1Error::UnsupportedOperation`] naming the register.
//!
//! Addresses are the first group of the characteristic UUID followed by `-`
//! (for example `0000fff1-`). Backends resolve them by prefix against the
//! characteristics the device actually exposes.

use crate::error::{F1Error, Result};
use uuid::Uuid;

/// Suffix appended to a short address to form the default 128-bit UUID.
pub const BASE_UUID_SUFFIX: &str = "0000-1000-8000-00805f9b34fb";

/// Characteristic identifiers (UUID prefixes) exposed by the device.
pub mod characteristics {
    /// Key state (central button authorization, protocol v1)
    pub const KEY_STATE: &str = "00000a0f-";
    /// Security access challenge (protocol v2 only)
    pub const SECURITY_ACCESS: &str = "00000a10-";
    /// Motor control
    pub const MOTOR_CONTROL: &str = "0000fff1-";
    /// Manufacturer name string
    pub const MANUFACTURER_NAME: &str = "00002a29-";
    /// Model number string
    pub const MODEL_NUMBER: &str = "00002a24-";
    /// Hardware revision string
    pub const HARDWARE_REVISION: &str = "00002a27-";
    /// Firmware revision string
    pub const FIRMWARE_REVISION: &str = "00002a26-";
    /// Software revision string
    pub const SOFTWARE_REVISION: &str = "00002a28-";
    /// MAC address
    pub const MAC_ADDRESS: &str = "00000a06-";
    /// Serial number
    pub const SERIAL_NUMBER: &str = "00000a05-";
    /// Battery level
    pub const BATTERY_LEVEL: &str = "00002a19-";
    /// Cruise control
    pub const MOTOR_WORK_ON_TOUCH: &str = "00000aa5-";
    /// Auto vibration settings
    pub const VIBRATOR_SETTING: &str = "00000a0d-";
    /// Quick wake-up
    pub const WAKE_UP: &str = "00000aa1-";
    /// Hall sensor (rotation speed)
    pub const HALL: &str = "00000aa3-";
    /// Insertion depth
    pub const LENGTH: &str = "00000a0b-";
    /// Accelerometer
    pub const ACCELEROMETER: &str = "00000a0c-";
    /// Temperature and pressure
    pub const PRESSURE: &str = "00000a0a-";
    /// Buttons
    pub const BUTTON: &str = "00000aa4-";
    /// Use counter
    pub const USER_RECORD: &str = "00000a04-";
    /// Chip identifier
    pub const CHIP_ID: &str = "00000a07-";
    /// Generic access: device name
    pub const GENERIC_ACCESS_DEVICE_NAME: &str = "00002a00-";
    /// Generic access: appearance
    pub const GENERIC_ACCESS_APPEARANCE: &str = "00002a01-";
    /// Generic access: peripheral preferred connection parameters
    pub const GENERIC_ACCESS_PERIPHERAL_PREFERRED_CONNECTION_PARAMETERS: &str = "00002a04-";
    /// Device information: system id
    pub const DEVICE_INFORMATION_SYSTEM_ID: &str = "00002a23-";
    /// Device information: serial number string
    pub const DEVICE_INFORMATION_SERIAL_NUMBER_STRING: &str = "00002a25-";
    /// Device information: IEEE 11073-20601 certification data
    pub const DEVICE_INFORMATION_IEEE11073: &str = "00002a2a-";
    /// Device information: PnP id
    pub const DEVICE_INFORMATION_PNP_ID: &str = "00002a50-";
}

/// A value decoded from (or to be encoded into) a register
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterValue {
    /// No value (command-style writes)
    Empty,
    /// Boolean flag
    Flag(bool),
    /// Unsigned integer (single byte or 16-bit big-endian)
    Number(u16),
    /// UTF-8 or hex-formatted string
    Text(String),
    /// Main motor and vibration motor speed
    Pair(u8, u8),
    /// Accelerometer axes
    Triple(u16, u16, u16),
    /// Temperature (°C) and pressure (mbar)
    Climate(f64, f64),
    /// Raw byte sequence
    Bytes(Vec<u8>),
}

impl RegisterValue {
    /// Boolean content, if this is a flag
    #[must_use]
    pub const fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(v) => Some(*v),
            _ => None,
        }
    }

    /// Integer content, if this is a number
    #[must_use]
    pub const fn as_number(&self) -> Option<u16> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// String content, if this is text
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Motor speed pair
    #[must_use]
    pub const fn as_pair(&self) -> Option<(u8, u8)> {
        match self {
            Self::Pair(a, b) => Some((*a, *b)),
            _ => None,
        }
    }

    /// Accelerometer triple
    #[must_use]
    pub const fn as_triple(&self) -> Option<(u16, u16, u16)> {
        match self {
            Self::Triple(x, y, z) => Some((*x, *y, *z)),
            _ => None,
        }
    }

    /// Temperature and pressure
    #[must_use]
    pub const fn as_climate(&self) -> Option<(f64, f64)> {
        match self {
            Self::Climate(t, p) => Some((*t, *p)),
            _ => None,
        }
    }

    /// Raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

type Reader = fn(&[u8]) -> std::result::Result<RegisterValue, String>;
type Writer = fn(&RegisterValue) -> std::result::Result<Vec<u8>, String>;

/// A device register: address plus read/write converters
#[derive(Debug)]
pub struct Register {
    /// Human readable register name
    pub name: &'static str,
    /// Characteristic address prefix
    pub address: &'static str,
    reader: Option<Reader>,
    writer: Option<Writer>,
}

impl Register {
    const fn new(
        name: &'static str,
        address: &'static str,
        reader: Option<Reader>,
        writer: Option<Writer>,
    ) -> Self {
        Self {
            name,
            address,
            reader,
            writer,
        }
    }

    /// Whether the register can be read
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        self.reader.is_some()
    }

    /// Whether the register can be written
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.writer.is_some()
    }

    /// Translate device bytes to a usable value
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::UnsupportedOperation`] for write-only registers and
    /// [`F1Error::Conversion`] for malformed payloads.
    pub fn from_device(&self, raw: &[u8]) -> Result<RegisterValue> {
        let reader = self.reader.ok_or_else(|| {
            F1Error::UnsupportedOperation(format!("register {} cannot be read", self.name))
        })?;
        reader(raw).map_err(|reason| F1Error::conversion(self.name, reason))
    }

    /// Translate a usable value to device bytes
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::UnsupportedOperation`] for read-only registers and
    /// [`F1Error::Validation`] when the value does not fit the register.
    pub fn to_device(&self, value: &RegisterValue) -> Result<Vec<u8>> {
        let writer = self.writer.ok_or_else(|| {
            F1Error::UnsupportedOperation(format!("register {} cannot be written", self.name))
        })?;
        writer(value).map_err(|reason| F1Error::Validation(format!("{}: {reason}", self.name)))
    }

    /// Whether a characteristic UUID belongs to this register
    #[must_use]
    pub fn matches(&self, uuid: &str) -> bool {
        uuid.to_ascii_lowercase().starts_with(self.address)
    }

    /// Default full UUID for the register address
    ///
    /// # Errors
    ///
    /// Returns [`F1Error::Protocol`] if the address does not form a valid UUID.
    pub fn uuid(&self) -> Result<Uuid> {
        Uuid::parse_str(&format!("{}{BASE_UUID_SUFFIX}", self.address))
            .map_err(|e| F1Error::Protocol(format!("Invalid UUID for {}: {e}", self.name)))
    }
}

impl PartialEq for Register {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.address == other.address
    }
}

impl Eq for Register {}

fn require(raw: &[u8], len: usize) -> std::result::Result<(), String> {
    if raw.len() < len {
        return Err(format!("expected at least {len} bytes, got {}", raw.len()));
    }
    Ok(())
}

fn read_flag_bit(raw: &[u8]) -> std::result::Result<RegisterValue, String> {
    require(raw, 1)?;
    Ok(RegisterValue::Flag(raw[0] & 0x01 != 0))
}

fn read_flag_enabled(raw: &[u8]) -> std::result::Result<RegisterValue, String> {
    require(raw, 1)?;
    Ok(RegisterValue::Flag(raw[0] == 0x01))
}

fn write_flag(value: &RegisterValue) -> std::result::Result<Vec<u8>, String> {
    value
        .as_flag()
        .map(|v| vec![u8::from(v)])
        .ok_or_else(|| format!("expected a boolean, got {value:?}"))
}

fn write_cruise_control(value: &RegisterValue) -> std::result::Result<Vec<u8>, String> {
    match value {
        RegisterValue::Flag(v) => Ok(vec![u8::from(*v)]),
        RegisterValue::Number(n) if *n <= 0x02 => Ok(vec![*n as u8]),
        other => Err(format!("expected a cruise control status, got {other:?}")),
    }
}

fn read_motor_speed(raw: &[u8]) -> std::result::Result<RegisterValue, String> {
    require(raw, 3)?;
    Ok(RegisterValue::Pair(raw[1], raw[2]))
}

fn write_motor_speed(value: &RegisterValue) -> std::result::Result<Vec<u8>, String> {
    value
        .as_pair()
        .map(|(main, vibe)| vec![0x01, main, vibe])
        .ok_or_else(|| format!("expected a pair of speeds, got {value:?}"))
}

fn write_motor_stop(_: &RegisterValue) -> std::result::Result<Vec<u8>, String> {
    Ok(vec![0x01, 0x00, 0x00])
}

fn write_shutdown(_: &RegisterValue) -> std::result::Result<Vec<u8>, String> {
    Ok(vec![0x01, 0xFA])
}

fn write_verify_accelerometer(_: &RegisterValue) -> std::result::Result<Vec<u8>, String> {
    Ok(vec![0xFF, 0xFF, 0xFF])
}

fn write_user_record_reset(_: &RegisterValue) -> std::result::Result<Vec<u8>, String> {
    Ok(vec![0xEE])
}

fn read_u8(raw: &[u8]) -> std::result::Result<RegisterValue, String> {
    require(raw, 1)?;
    Ok(RegisterValue::Number(u16::from(raw[0])))
}

fn read_u16(raw: &[u8]) -> std::result::Result<RegisterValue, String> {
    require(raw, 2)?;
    Ok(RegisterValue::Number(u16::from_be_bytes([raw[0], raw[1]])))
}

fn read_accelerometer(raw: &[u8]) -> std::result::Result<RegisterValue, String> {
    require(raw, 6)?;
    Ok(RegisterValue::Triple(
        u16::from_be_bytes([raw[0], raw[1]]),
        u16::from_be_bytes([raw[2], raw[3]]),
        u16::from_be_bytes([raw[4], raw[5]]),
    ))
}

fn read_temperature_pressure(raw: &[u8]) -> std::result::Result<RegisterValue, String> {
    require(raw, 8)?;
    let temperature = u32::from(raw[0]) * 65536 + u32::from(raw[1]) * 256 + u32::from(raw[2]);
    let pressure = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
    Ok(RegisterValue::Climate(
        f64::from(temperature) / 100.0,
        f64::from(pressure) / 100.0,
    ))
}

fn read_vibrator_setting(raw: &[u8]) -> std::result::Result<RegisterValue, String> {
    if raw.len() != 8 {
        return Err(format!("expected 8 settings, got {}", raw.len()));
    }
    Ok(RegisterValue::Bytes(raw.to_vec()))
}

fn write_vibrator_setting(value: &RegisterValue) -> std::result::Result<Vec<u8>, String> {
    match value.as_bytes() {
        Some(settings) if settings.len() == 8 => Ok(settings.to_vec()),
        _ => Err(format!("expected 8 settings, got {value:?}")),
    }
}

fn read_security_access(raw: &[u8]) -> std::result::Result<RegisterValue, String> {
    if raw.len() != 8 {
        return Err(format!("expected 8 bytes, got {}", raw.len()));
    }
    Ok(RegisterValue::Bytes(raw.to_vec()))
}

fn write_security_access(value: &RegisterValue) -> std::result::Result<Vec<u8>, String> {
    match value.as_bytes() {
        Some(pattern) if pattern.len() == 8 => Ok(pattern.to_vec()),
        _ => Err(format!("expected an 8 byte pattern, got {value:?}")),
    }
}

fn read_text(raw: &[u8]) -> std::result::Result<RegisterValue, String> {
    String::from_utf8(raw.to_vec())
        .map(RegisterValue::Text)
        .map_err(|e| format!("invalid UTF-8: {e}"))
}

fn read_hex(raw: &[u8]) -> std::result::Result<RegisterValue, String> {
    Ok(RegisterValue::Text(hex_string(raw)))
}

/// Format bytes as upper-case hex pairs joined by `:`
#[must_use]
pub fn hex_string(raw: &[u8]) -> String {
    raw.iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Key state: bit 0 set once the central button authorized the connection
pub static KEY_STATE: Register = Register::new(
    "KEY STATE",
    characteristics::KEY_STATE,
    Some(read_flag_bit),
    None,
);

/// Version 2 security access challenge
pub static SECURITY_ACCESS: Register = Register::new(
    "SECURITY ACCESS",
    characteristics::SECURITY_ACCESS,
    Some(read_security_access),
    Some(write_security_access),
);

/// Main and vibration motor speeds
pub static MOTOR_SPEED: Register = Register::new(
    "MOTOR SPEED",
    characteristics::MOTOR_CONTROL,
    Some(read_motor_speed),
    Some(write_motor_speed),
);

/// Stop both motors
pub static MOTOR_STOP: Register = Register::new(
    "MOTOR STOP",
    characteristics::MOTOR_CONTROL,
    None,
    Some(write_motor_stop),
);

/// Device shutdown
pub static SHUTDOWN: Register = Register::new(
    "SHUTDOWN",
    characteristics::MOTOR_CONTROL,
    None,
    Some(write_shutdown),
);

/// Accelerometer verification mode
pub static VERIFY_ACCELEROMETER: Register = Register::new(
    "VERIFY ACCELEROMETER",
    characteristics::MOTOR_CONTROL,
    None,
    Some(write_verify_accelerometer),
);

/// Cruise control
pub static MOTOR_WORK_ON_TOUCH: Register = Register::new(
    "MOTOR WORK ON TOUCH",
    characteristics::MOTOR_WORK_ON_TOUCH,
    Some(read_flag_enabled),
    Some(write_cruise_control),
);

/// Auto vibration settings, 8 values
pub static VIBRATOR_SETTING: Register = Register::new(
    "VIBRATOR SETTING",
    characteristics::VIBRATOR_SETTING,
    Some(read_vibrator_setting),
    Some(write_vibrator_setting),
);

/// Quick wake-up
pub static WAKE_UP: Register = Register::new(
    "WAKE UP",
    characteristics::WAKE_UP,
    Some(read_flag_enabled),
    Some(write_flag),
);

/// Rotation speed from the Hall sensors
pub static HALL: Register = Register::new("HALL", characteristics::HALL, Some(read_u16), None);

/// Insertion depth
pub static LENGTH: Register = Register::new("LENGTH", characteristics::LENGTH, Some(read_u16), None);

/// Accelerometer axes
pub static ACCELEROMETER: Register = Register::new(
    "ACCELEROMETER",
    characteristics::ACCELEROMETER,
    Some(read_accelerometer),
    None,
);

/// Temperature and pressure
pub static PRESSURE_TEMPERATURE: Register = Register::new(
    "PRESSURE_TEMPERATURE",
    characteristics::PRESSURE,
    Some(read_temperature_pressure),
    None,
);

/// Buttons status
pub static BUTTON: Register = Register::new("BUTTON", characteristics::BUTTON, Some(read_u8), None);

/// Use counter
pub static USER_RECORD: Register = Register::new(
    "USER RECORD",
    characteristics::USER_RECORD,
    Some(read_u16),
    None,
);

/// Use counter reset
pub static USER_RECORD_RESET: Register = Register::new(
    "USER RECORD RESET",
    characteristics::USER_RECORD,
    None,
    Some(write_user_record_reset),
);

/// Manufacturer name
pub static MANUFACTURER_NAME: Register = Register::new(
    "MANUFACTURER NAME",
    characteristics::MANUFACTURER_NAME,
    Some(read_text),
    None,
);

/// Model number
pub static MODEL_NUMBER: Register = Register::new(
    "MODEL NUMBER",
    characteristics::MODEL_NUMBER,
    Some(read_text),
    None,
);

/// Hardware revision
pub static HARDWARE_REVISION: Register = Register::new(
    "HARDWARE REVISION",
    characteristics::HARDWARE_REVISION,
    Some(read_text),
    None,
);

/// Firmware revision
pub static FIRMWARE_REVISION: Register = Register::new(
    "FIRMWARE REVISION",
    characteristics::FIRMWARE_REVISION,
    Some(read_text),
    None,
);

/// Software revision
pub static SOFTWARE_REVISION: Register = Register::new(
    "SOFTWARE REVISION",
    characteristics::SOFTWARE_REVISION,
    Some(read_text),
    None,
);

/// MAC address
pub static MAC_ADDRESS: Register = Register::new(
    "MAC ADDRESS",
    characteristics::MAC_ADDRESS,
    Some(read_hex),
    None,
);

/// Serial number
pub static SERIAL_NUMBER: Register = Register::new(
    "SERIAL NUMBER",
    characteristics::SERIAL_NUMBER,
    Some(read_hex),
    None,
);

/// Battery level, 0 to 100
pub static BATTERY_LEVEL: Register = Register::new(
    "BATTERY LEVEL",
    characteristics::BATTERY_LEVEL,
    Some(read_u8),
    None,
);

/// Chip identifier
pub static CHIP_ID: Register =
    Register::new("CHIP ID", characteristics::CHIP_ID, Some(read_hex), None);

/// Generic access device name
pub static GENERIC_ACCESS_DEVICE_NAME: Register = Register::new(
    "DEVICE NAME",
    characteristics::GENERIC_ACCESS_DEVICE_NAME,
    Some(read_text),
    None,
);

/// Generic access appearance
pub static GENERIC_ACCESS_APPEARANCE: Register = Register::new(
    "APPEARANCE",
    characteristics::GENERIC_ACCESS_APPEARANCE,
    Some(read_hex),
    None,
);

/// Generic access peripheral preferred connection parameters
pub static GENERIC_ACCESS_PERIPHERAL_PREFERRED_CONNECTION_PARAMETERS: Register = Register::new(
    "PPCP",
    characteristics::GENERIC_ACCESS_PERIPHERAL_PREFERRED_CONNECTION_PARAMETERS,
    Some(read_hex),
    None,
);

/// Device information system id
pub static DEVICE_INFORMATION_SYSTEM_ID: Register = Register::new(
    "SYSTEM ID",
    characteristics::DEVICE_INFORMATION_SYSTEM_ID,
    Some(read_hex),
    None,
);

/// Device information serial number string
pub static DEVICE_INFORMATION_SERIAL_NUMBER_STRING: Register = Register::new(
    "SERIAL NUMBER STRING",
    characteristics::DEVICE_INFORMATION_SERIAL_NUMBER_STRING,
    Some(read_text),
    None,
);

/// Device information IEEE 11073-20601 certification data
pub static DEVICE_INFORMATION_IEEE11073: Register = Register::new(
    "IEEE11073",
    characteristics::DEVICE_INFORMATION_IEEE11073,
    Some(read_hex),
    None,
);

/// Device information PnP id
pub static DEVICE_INFORMATION_PNP_ID: Register = Register::new(
    "PNP ID",
    characteristics::DEVICE_INFORMATION_PNP_ID,
    Some(read_hex),
    None,
);

/// Every register in the catalog
pub static ALL: [&Register; 32] = [
    &KEY_STATE,
    &SECURITY_ACCESS,
    &MOTOR_SPEED,
    &MOTOR_STOP,
    &SHUTDOWN,
    &VERIFY_ACCELEROMETER,
    &MOTOR_WORK_ON_TOUCH,
    &VIBRATOR_SETTING,
    &WAKE_UP,
    &HALL,
    &LENGTH,
    &ACCELEROMETER,
    &PRESSURE_TEMPERATURE,
    &BUTTON,
    &USER_RECORD,
    &USER_RECORD_RESET,
    &MANUFACTURER_NAME,
    &MODEL_NUMBER,
    &HARDWARE_REVISION,
    &FIRMWARE_REVISION,
    &SOFTWARE_REVISION,
    &MAC_ADDRESS,
    &SERIAL_NUMBER,
    &BATTERY_LEVEL,
    &CHIP_ID,
    &GENERIC_ACCESS_DEVICE_NAME,
    &GENERIC_ACCESS_APPEARANCE,
    &GENERIC_ACCESS_PERIPHERAL_PREFERRED_CONNECTION_PARAMETERS,
    &DEVICE_INFORMATION_SYSTEM_ID,
    &DEVICE_INFORMATION_SERIAL_NUMBER_STRING,
    &DEVICE_INFORMATION_IEEE11073,
    &DEVICE_INFORMATION_PNP_ID,
];
