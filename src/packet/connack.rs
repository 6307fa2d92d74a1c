use crate::encoding::decode_u8;
use crate::error::{MqttError, Result};
use crate::flags::ConnAckFlags;
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::{Properties, PropertyContext};
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT CONNACK packet
///
/// Under v3.1.1 the reason code is carried as a connect return code; see
/// [`ReasonCode::from_v311_connack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnAckPacket {
    /// Session present flag
    pub session_present: bool,
    /// Connect reason code
    pub reason_code: ReasonCode,
    /// CONNACK properties (v5.0 only)
    pub properties: Properties,
}

impl ConnAckPacket {
    /// Creates a new CONNACK packet
    #[must_use]
    pub fn new(session_present: bool, reason_code: ReasonCode) -> Self {
        Self {
            session_present,
            reason_code,
            properties: Properties::default(),
        }
    }

    /// Sets the session expiry interval
    #[must_use]
    pub fn with_session_expiry_interval(mut self, interval: u32) -> Self {
        self.properties.set_session_expiry_interval(interval);
        self
    }

    /// Sets the receive maximum
    #[must_use]
    pub fn with_receive_maximum(mut self, max: u16) -> Self {
        self.properties.set_receive_maximum(max);
        self
    }

    /// Sets the maximum `QoS`
    #[must_use]
    pub fn with_maximum_qos(mut self, qos: u8) -> Self {
        self.properties.set_maximum_qos(qos);
        self
    }

    /// Sets whether retain is available
    #[must_use]
    pub fn with_retain_available(mut self, available: bool) -> Self {
        self.properties.set_retain_available(available);
        self
    }

    /// Sets the maximum packet size
    #[must_use]
    pub fn with_maximum_packet_size(mut self, size: u32) -> Self {
        self.properties.set_maximum_packet_size(size);
        self
    }

    /// Sets the assigned client identifier
    #[must_use]
    pub fn with_assigned_client_id(mut self, id: String) -> Self {
        self.properties.set_assigned_client_identifier(id);
        self
    }

    /// Sets the topic alias maximum
    #[must_use]
    pub fn with_topic_alias_maximum(mut self, max: u16) -> Self {
        self.properties.set_topic_alias_maximum(max);
        self
    }

    /// Sets the server keep alive
    #[must_use]
    pub fn with_server_keep_alive(mut self, seconds: u16) -> Self {
        self.properties.set_server_keep_alive(seconds);
        self
    }

    /// Sets the reason string
    #[must_use]
    pub fn with_reason_string(mut self, reason: String) -> Self {
        self.properties.set_reason_string(reason);
        self
    }
}

impl MqttPacket for ConnAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::ConnAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        let flags = if self.session_present {
            ConnAckFlags::SessionPresent as u8
        } else {
            0
        };
        buf.put_u8(flags);

        if version.is_v5() {
            buf.put_u8(u8::from(self.reason_code));
            self.properties.encode(buf)?;
        } else {
            let return_code = self.reason_code.to_v311_connack().ok_or_else(|| {
                MqttError::UnsupportedImplementation(format!(
                    "{:?} has no MQTT 3.1.1 connect return code",
                    self.reason_code
                ))
            })?;
            if !self.properties.is_empty() {
                return Err(MqttError::UnsupportedImplementation(
                    "CONNACK properties require MQTT 5".to_string(),
                ));
            }
            buf.put_u8(return_code);
        }

        Ok(())
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        _fixed_header: &FixedHeader,
        version: ProtocolVersion,
    ) -> Result<Self> {
        let flags = decode_u8(buf)?;
        if flags & !(ConnAckFlags::SessionPresent as u8) != 0 {
            return Err(MqttError::MalformedPacket(format!(
                "reserved CONNACK flag bits set: 0x{flags:02X}"
            )));
        }
        let session_present = ConnAckFlags::decompose(flags).contains(&ConnAckFlags::SessionPresent);

        let code = decode_u8(buf)?;
        let reason_code = if version.is_v5() {
            ReasonCode::decode_for(PacketType::ConnAck, code)?
        } else {
            ReasonCode::from_v311_connack(code).ok_or_else(|| {
                MqttError::MalformedPacket(format!("unknown connect return code {code}"))
            })?
        };

        if session_present && reason_code != ReasonCode::Success {
            return Err(MqttError::ProtocolError(
                "session present set on a refused connection".to_string(),
            ));
        }

        let properties = if version.is_v5() {
            let properties = Properties::decode(buf)?;
            properties.validate_for(PropertyContext::Packet(PacketType::ConnAck))?;
            properties
        } else {
            Properties::default()
        };

        Ok(Self {
            session_present,
            reason_code,
            properties,
        })
    }
}
