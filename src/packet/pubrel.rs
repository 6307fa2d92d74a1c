use crate::error::Result;
use crate::packet::ack::{decode_ack, encode_ack};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT PUBREL packet (`QoS` 2 publish release, part 2)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubRelPacket {
    /// Packet identifier
    pub packet_id: u16,
    /// Reason code
    pub reason_code: ReasonCode,
    /// PUBREL properties (v5.0 only)
    pub properties: Properties,
}

impl PubRelPacket {
    /// Creates a new PUBREL packet
    #[must_use]
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            reason_code: ReasonCode::Success,
            properties: Properties::new(),
        }
    }

    /// Creates a new PUBREL packet with a reason code
    #[must_use]
    pub fn new_with_reason(packet_id: u16, reason_code: ReasonCode) -> Self {
        Self {
            packet_id,
            reason_code,
            properties: Properties::new(),
        }
    }
}

impl MqttPacket for PubRelPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PubRel
    }

    fn flags(&self) -> u8 {
        0x02 // PUBREL must have flags = 0x02
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        encode_ack(
            buf,
            PacketType::PubRel,
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
