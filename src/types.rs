use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// Connection state of a [`DeviceSession`](crate::DeviceSession)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No transport connection
    Disconnected,
    /// Connect attempts in progress
    Connecting,
    /// Transport connected, authorization not confirmed
    Connected,
    /// Authorization check in progress
    Authorizing,
    /// Connected and authorized
    Ready,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal transition
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Disconnected, Self::Connecting)
                | (Self::Connecting, Self::Connected | Self::Disconnected)
                | (Self::Connected, Self::Authorizing | Self::Disconnected)
                | (Self::Authorizing, Self::Ready | Self::Connected | Self::Disconnected)
                | (Self::Ready, Self::Authorizing | Self::Disconnected)
        )
    }

    /// Whether device I/O is allowed in this state
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Authorizing | Self::Ready)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Authorizing => write!(f, "Authorizing"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Device protocol generation, detected from the model number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// Original F1s: authorization through the key state register
    V1,
    /// F1s V2: authorization through the security access handshake
    V2,
}

impl ProtocolVersion {
    /// Classify a model number string
    #[must_use]
    pub fn from_model_number(model: &str) -> Self {
        if model.contains("V2") {
            Self::V2
        } else {
            Self::V1
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1 => write!(f, "V1"),
            Self::V2 => write!(f, "V2"),
        }
    }
}

/// Buttons status as reported by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonState {
    /// Central button pressed
    Central = 0x00,
    /// Plus button pressed
    Plus = 0x01,
    /// Minus button pressed
    Minus = 0x02,
    /// No button pressed
    NonePressed = 0x03,
}

impl TryFrom<u8> for ButtonState {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Central),
            0x01 => Ok(Self::Plus),
            0x02 => Ok(Self::Minus),
            0x03 => Ok(Self::NonePressed),
            other => Err(other),
        }
    }
}

/// Cruise control status values written to the device
pub mod cruise_control {
    /// Cruise control disabled
    pub const DISABLED: u16 = 0x00;
    /// Cruise control enabled
    pub const ENABLED: u16 = 0x01;
    /// Enable and reset motor speed to default (write only)
    pub const ENABLE_AND_RESET: u16 = 0x02;
}

/// A device seen during discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Transport address (MAC address or platform identifier)
    pub address: String,
    /// Advertised name
    pub name: Option<String>,
    /// Signal strength (RSSI)
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    /// Create a new discovered device
    #[must_use]
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name,
            rssi: None,
        }
    }
}

/// Identity of the last connected device, used to seed reconnect attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Transport address
    pub address: String,
    /// Protocol identifier (model number read at connect time)
    pub protocol_identifier: Option<String>,
    /// Name to show to users
    pub display_name: Option<String>,
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay between connect attempts in milliseconds
    pub connect_retry_interval_ms: u64,
    /// Connect deadline in milliseconds
    pub connect_timeout_ms: u64,
    /// Discovery deadline in milliseconds
    pub discover_timeout_ms: u64,
    /// Duration of a single scan round in milliseconds
    pub scan_window_ms: u64,
    /// Require device authorization before control commands
    pub authorization_check: bool,
    /// Read and log every characteristic right after connecting
    pub profile_on_connect: bool,
}

impl SessionConfig {
    /// Delay between connect attempts
    #[must_use]
    pub const fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }

    /// Duration of a single scan round
    #[must_use]
    pub const fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }

    /// Default connect deadline
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Default discovery deadline
    #[must_use]
    pub const fn discover_timeout(&self) -> Duration {
        Duration::from_millis(self.discover_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_retry_interval_ms: 250,
            connect_timeout_ms: 1_000,
            discover_timeout_ms: 1_000,
            scan_window_ms: 1_000,
            authorization_check: true,
            profile_on_connect: true,
        }
    }
}

/// Remote proxy configuration, shared by server and client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Address to bind (server) or connect to (client)
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Accept poll interval in milliseconds; bounds stop latency
    pub accept_poll_ms: u64,
    /// Receive poll interval in milliseconds; bounds stop latency
    pub receive_poll_ms: u64,
    /// How long the client waits for a response in milliseconds
    pub response_timeout_ms: u64,
    /// Maximum accepted line length in bytes
    pub max_line_length: usize,
}

impl ProxyConfig {
    /// `host:port` string
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Accept poll interval
    #[must_use]
    pub const fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms)
    }

    /// Receive poll interval
    #[must_use]
    pub const fn receive_poll(&self) -> Duration {
        Duration::from_millis(self.receive_poll_ms)
    }

    /// Client response timeout
    #[must_use]
    pub const fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5005,
            accept_poll_ms: 3_000,
            receive_poll_ms: 3_000,
            response_timeout_ms: 10_000,
            max_line_length: 64 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Authorizing));
        assert!(Authorizing.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Disconnected));

        assert!(!Disconnected.can_transition_to(Ready));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Connecting.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Connecting));
    }

    #[test]
    fn test_protocol_version_detection() {
        assert_eq!(ProtocolVersion::from_model_number("F1SV2A"), ProtocolVersion::V2);
        assert_eq!(ProtocolVersion::from_model_number("F1s"), ProtocolVersion::V1);
        assert_eq!(ProtocolVersion::from_model_number("f1sv2"), ProtocolVersion::V1);
    }

    #[test]
    fn test_button_state_from_u8() {
        assert_eq!(ButtonState::try_from(0x00), Ok(ButtonState::Central));
        assert_eq!(ButtonState::try_from(0x03), Ok(ButtonState::NonePressed));
        assert_eq!(ButtonState::try_from(0x09), Err(0x09));
    }

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.connect_retry_interval(), Duration::from_millis(250));
        assert_eq!(config.connect_timeout_ms, 1_000);
        assert!(config.authorization_check);
    }

    #[test]
    fn test_proxy_config_from_partial_json() {
        let config: ProxyConfig = serde_json::from_str(r#"{"port": 6000}"#).unwrap();
        assert_eq!(config.port, 6000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.address(), "0.0.0.0:6000");
    }
}
