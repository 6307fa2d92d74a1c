use crate::error::Result;
use crate::packet::ack::{decode_ack, encode_ack};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT PUBACK packet (`QoS` 1 publish acknowledgment)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubAckPacket {
    /// Packet identifier
    pub packet_id: u16,
    /// Reason code
    pub reason_code: ReasonCode,
    /// PUBACK properties (v5.0 only)
    pub properties: Properties,
}

impl PubAckPacket {
    /// Creates a new PUBACK packet
    #[must_use]
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            reason_code: ReasonCode::Success,
            properties: Properties::default(),
        }
    }

    /// Creates a new PUBACK packet with a reason code
    #[must_use]
    pub fn new_with_reason(packet_id: u16, reason_code: ReasonCode) -> Self {
        Self {
            packet_id,
            reason_code,
            properties: Properties::default(),
        }
    }

    /// Sets the reason string
    #[must_use]
    pub fn with_reason_string(mut self, reason: String) -> Self {
        self.properties.set_reason_string(reason);
        self
    }

    /// Adds a user property
    #[must_use]
    pub fn with_user_property(mut self, key: String, value: String) -> Self {
        self.properties.add_user_property(key, value);
        self
    }
}

impl MqttPacket for PubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        encode_ack(
            buf,
            PacketType::PubAck,
            self.packet_id,
            self.reason_code,
            &self.properties,
            version,
        )
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        fixed_header: &FixedHeader,
        version: ProtocolVersion,
    ) -> Result<Self> {
        let body = decode_ack(buf, fixed_header, version)?;
        Ok(Self {
            packet_id: body.packet_id,
            reason_code: body.reason_code,
            properties: body.properties,
        })
    }
}
