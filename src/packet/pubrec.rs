use crate::error::Result;
use crate::packet::ack::{decode_ack, encode_ack};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT PUBREC packet (`QoS` 2 publish received, part 1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubRecPacket {
    /// Packet identifier
    pub packet_id: u16,
    /// Reason code
    pub reason_code: ReasonCode,
    /// PUBREC properties (v5.0 only)
    pub properties: Properties,
}

impl PubRecPacket {
    /// Creates a new PUBREC packet
    #[must_use]
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            reason_code: ReasonCode::Success,
            properties: Properties::default(),
        }
    }

    /// Creates a new PUBREC packet with a reason code
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
}

impl MqttPacket for PubRecPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PubRec
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        encode_ack(
            buf,
            PacketType::PubRec,
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

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_pubrec_error_reason_roundtrip() {
        let packet = PubRecPacket::new_with_reason(5, ReasonCode::QuotaExceeded)
            .with_reason_string("slow down".to_string());

        let mut buf = BytesMut::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        assert_eq!(buf[0], 0x50);

        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        let decoded =
            PubRecPacket::decode_body(&mut buf, &fixed_header, ProtocolVersion::V5).unwrap();
        assert_eq!(decoded, packet);
        assert!(decoded.reason_code.is_error());
    }

    #[test]
    fn test_pubrec_short_form_decodes_success() {
        let mut buf: &[u8] = &[0x00, 0x05];
        let fixed_header = FixedHeader::new(PacketType::PubRec, 0, 2);
        let decoded =
            PubRecPacket::decode_body(&mut buf, &fixed_header, ProtocolVersion::V5).unwrap();
        assert_eq!(decoded, PubRecPacket::new(5));
    }
}
