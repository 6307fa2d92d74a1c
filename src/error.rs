use crate::protocol::v5::reason_codes::ReasonCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MqttError>;

/// MQTT protocol engine errors
///
/// # Error Categories
///
/// - **Streaming**: `Incomplete` signals that the reader ran out of bytes before a
///   field was complete. It never escapes the streaming codec; inside a framed
///   packet body it is reported as `MalformedPacket`.
/// - **Fatal to the connection**: `MalformedPacket`, `ProtocolError`,
///   `PacketTooLarge`, `TopicAliasInvalid`, `ReceiveMaximumExceeded`,
///   `KeepAliveTimeout`. See [`MqttError::disconnect_reason`].
/// - **Local backpressure**: `PacketIdExhausted`, `QuotaExceeded`. The connection
///   stays open and the caller may retry. See [`MqttError::is_recoverable`].
/// - **Bookkeeping bugs**: `InvariantViolation`.
/// - **Boundary**: `UnsupportedImplementation` for values the engine cannot
///   represent in the negotiated protocol version.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MqttError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Incomplete data: {needed} more byte(s) required")]
    Incomplete { needed: usize },

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Packet too large: size {size} exceeds maximum {max}")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Topic alias invalid: {0}")]
    TopicAliasInvalid(u16),

    #[error("Receive maximum exceeded")]
    ReceiveMaximumExceeded,

    #[error("Keep alive timeout")]
    KeepAliveTimeout,

    #[error("Packet identifiers exhausted")]
    PacketIdExhausted,

    #[error("Send quota exceeded")]
    QuotaExceeded,

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Unsupported implementation: {0}")]
    UnsupportedImplementation(String),

    #[error("Invalid topic name: {0}")]
    InvalidTopicName(String),

    #[error("Invalid topic filter: {0}")]
    InvalidTopicFilter(String),

    #[error("Invalid client ID: {0}")]
    InvalidClientId(String),

    #[error("Connection refused: {0:?}")]
    ConnectionRefused(ReasonCode),

    #[error("Disconnected by server: {0:?}")]
    ServerDisconnected(ReasonCode),

    #[error("Publish failed: {0:?}")]
    PublishFailed(ReasonCode),

    #[error("Session discarded before the exchange completed")]
    SessionDiscarded,

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl MqttError {
    /// Whether the error is local backpressure that leaves the connection open
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::PacketIdExhausted | Self::QuotaExceeded)
    }

    /// Reason code to place in the DISCONNECT sent before closing, if this
    /// error is fatal to the connection
    #[must_use]
    pub fn disconnect_reason(&self) -> Option<ReasonCode> {
        match self {
            Self::MalformedPacket(_) | Self::Incomplete { .. } => Some(ReasonCode::MalformedPacket),
            Self::ProtocolError(_) => Some(ReasonCode::ProtocolError),
            Self::PacketTooLarge { .. } => Some(ReasonCode::PacketTooLarge),
            Self::TopicAliasInvalid(_) => Some(ReasonCode::TopicAliasInvalid),
            Self::ReceiveMaximumExceeded => Some(ReasonCode::ReceiveMaximumExceeded),
            Self::KeepAliveTimeout => Some(ReasonCode::KeepAliveTimeout),
            _ => None,
        }
    }

    /// Whether the error ends the connection it was raised on
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.disconnect_reason().is_some() || matches!(self, Self::InvariantViolation(_))
    }

    /// Reinterprets a short read inside an already framed packet body
    #[must_use]
    pub fn into_malformed(self) -> Self {
        match self {
            Self::Incomplete { needed } => Self::MalformedPacket(format!(
                "packet body ended {needed} byte(s) early"
            )),
            other => other,
        }
    }
}

impl From<std::io::Error> for MqttError {
    fn from(err: std::io::Error) -> Self {
        MqttError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MqttError {
    fn from(err: serde_json::Error) -> Self {
        MqttError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display() {
        let err = MqttError::InvalidTopicName("test/+/topic".to_string());
        assert_eq!(err.to_string(), "Invalid topic name: test/+/topic");

        let err = MqttError::PacketTooLarge {
            size: 1000,
            max: 500,
        };
        assert_eq!(
            err.to_string(),
            "Packet too large: size 1000 exceeds maximum 500"
        );

        let err = MqttError::ConnectionRefused(ReasonCode::BadUsernameOrPassword);
        assert_eq!(err.to_string(), "Connection refused: BadUsernameOrPassword");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        let mqtt_err: MqttError = io_err.into();
        match mqtt_err {
            MqttError::Io(e) => assert!(e.contains("reset by peer")),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(MqttError::PacketIdExhausted.is_recoverable());
        assert!(MqttError::QuotaExceeded.is_recoverable());
        assert!(!MqttError::MalformedPacket("x".into()).is_recoverable());
        assert!(!MqttError::InvariantViolation("x".into()).is_recoverable());
    }

    #[test]
    fn test_disconnect_reason_mapping() {
        assert_eq!(
            MqttError::MalformedPacket("bad".into()).disconnect_reason(),
            Some(ReasonCode::MalformedPacket)
        );
        assert_eq!(
            MqttError::ProtocolError("bad".into()).disconnect_reason(),
            Some(ReasonCode::ProtocolError)
        );
        assert_eq!(
            MqttError::ReceiveMaximumExceeded.disconnect_reason(),
            Some(ReasonCode::ReceiveMaximumExceeded)
        );
        assert_eq!(MqttError::QuotaExceeded.disconnect_reason(), None);
        assert!(MqttError::InvariantViolation("double release".into()).is_fatal());
        assert!(!MqttError::PacketIdExhausted.is_fatal());
    }

    #[test]
    fn test_into_malformed() {
        let err = MqttError::Incomplete { needed: 3 }.into_malformed();
        assert!(matches!(err, MqttError::MalformedPacket(_)));

        let err = MqttError::ProtocolError("x".into()).into_malformed();
        assert!(matches!(err, MqttError::ProtocolError(_)));
    }
}
