//! Protocol versions and MQTT 5 protocol elements

pub mod v5;

use crate::constants::protocol::{LEVEL_V311, LEVEL_V5};
use crate::error::{MqttError, Result};
use serde::{Deserialize, Serialize};

/// Protocol level negotiated in CONNECT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// MQTT 3.1.1, protocol level 4
    V311,
    /// MQTT 5.0, protocol level 5
    #[default]
    V5,
}

impl ProtocolVersion {
    #[must_use]
    pub fn level(self) -> u8 {
        match self {
            Self::V311 => LEVEL_V311,
            Self::V5 => LEVEL_V5,
        }
    }

    /// # Errors
    ///
    /// Returns `MalformedPacket` for any level other than 4 or 5
    pub fn from_level(level: u8) -> Result<Self> {
        match level {
            LEVEL_V311 => Ok(Self::V311),
            LEVEL_V5 => Ok(Self::V5),
            other => Err(MqttError::MalformedPacket(format!(
                "unsupported protocol level {other}"
            ))),
        }
    }

    #[must_use]
    pub fn is_v5(self) -> bool {
        self == Self::V5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_levels() {
        assert_eq!(ProtocolVersion::V311.level(), 4);
        assert_eq!(ProtocolVersion::V5.level(), 5);
        assert_eq!(ProtocolVersion::from_level(4).unwrap(), ProtocolVersion::V311);
        assert_eq!(ProtocolVersion::from_level(5).unwrap(), ProtocolVersion::V5);
        assert!(ProtocolVersion::from_level(3).is_err());
    }
}
