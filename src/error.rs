use thiserror::Error;

/// Errors that can occur when working with F1s devices or the remote proxy
#[derive(Error, Debug)]
pub enum F1Error {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Bad argument shape or range, raised before any I/O
    #[error("Invalid parameters: {0}")]
    Validation(String),

    /// The operation requires an active connection
    #[error("Client is not connected")]
    NotConnected,

    /// The device has not authorized this connection
    #[error("Client is not authorized: {0}")]
    NotAuthorized(String),

    /// I/O failure reported by the transport backend
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed payload received from the device
    #[error("Conversion error on register {register}: {reason}")]
    Conversion {
        /// Register name
        register: &'static str,
        /// What was wrong with the payload
        reason: String,
    },

    /// Wrong direction on a register, or an operation the client variant cannot perform
    #[error("Operation not supported: {0}")]
    UnsupportedOperation(String),

    /// Malformed proxy envelope or unknown command
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Proxy peer has not been authorized to control the device
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// Proxy peer was denied earlier and is permanently blocked
    #[error("Peer {0} is blocked")]
    PeerBlocked(String),

    /// Error reported by a remote proxy server
    #[error("Remote error: {0}")]
    Remote(String),

    /// Operation timed out
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Session state machine refused a transition
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for F1s operations
pub type Result<T> = std::result::Result<T, F1Error>;

impl F1Error {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_) | Self::NotConnected | Self::Transport(_) | Self::Io(_)
        )
    }

    /// Check if this error is recoverable by retrying or fixing input
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Validation(_) | Self::NotAuthorized(_)
        )
    }

    /// Short stable name of the error class
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Ble(_) | Self::Transport(_) | Self::Io(_) => "TransportError",
            Self::Validation(_) => "ValidationError",
            Self::NotConnected => "NotConnectedError",
            Self::NotAuthorized(_) => "NotAuthorizedError",
            Self::Conversion { .. } => "ConversionError",
            Self::UnsupportedOperation(_) => "UnsupportedOperationError",
            Self::Protocol(_) | Self::Json(_) => "ProtocolError",
            Self::AuthorizationDenied(_) | Self::PeerBlocked(_) => "AuthorizationDeniedError",
            Self::Remote(_) => "RemoteError",
            Self::Timeout { .. } => "TimeoutError",
            Self::InvalidState(_) => "InvalidStateError",
        }
    }

    pub(crate) fn conversion(register: &'static str, reason: impl Into<String>) -> Self {
        Self::Conversion {
            register,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let transport_error = F1Error::Transport("link lost".to_string());
        assert!(transport_error.is_connection_error());
        assert!(!transport_error.is_recoverable());

        let timeout_error = F1Error::Timeout { timeout_ms: 5000 };
        assert!(!timeout_error.is_connection_error());
        assert!(timeout_error.is_recoverable());

        assert!(F1Error::NotConnected.is_connection_error());
        assert!(!F1Error::UnsupportedOperation("read".into()).is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = F1Error::Validation("speed out of range".to_string());
        let error_string = format!("{error}");
        assert!(error_string.contains("Invalid parameters"));
        assert!(error_string.contains("speed out of range"));

        let error = F1Error::conversion("BUTTON", "empty payload");
        assert_eq!(
            error.to_string(),
            "Conversion error on register BUTTON: empty payload"
        );
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(
            F1Error::AuthorizationDenied("client is not authorized".into()).kind(),
            "AuthorizationDeniedError"
        );
        assert_eq!(F1Error::PeerBlocked("1.2.3.4:5".into()).kind(), "AuthorizationDeniedError");
        assert_eq!(F1Error::Protocol("bad".into()).kind(), "ProtocolError");
    }
}
