use crate::error::Result;
use crate::packet::ack::{decode_ack, encode_ack};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT PUBCOMP packet (`QoS` 2 publish complete, part 3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubCompPacket {
    /// Packet identifier
    pub packet_id: u16,
    /// Reason code
    pub reason_code: ReasonCode,
    /// PUBCOMP properties (v5.0 only)
    pub properties: Properties,
}

impl PubCompPacket {
    /// Creates a new PUBCOMP packet
    #[must_use]
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            reason_code: ReasonCode::Success,
            properties: Properties::new(),
        }
    }

    /// Creates a new PUBCOMP packet with a reason code
    #[must_use]
    pub fn new_with_reason(packet_id: u16, reason_code: ReasonCode) -> Self {
        Self {
            packet_id,
            reason_code,
            properties: Properties::new(),
        }
    }
}

impl MqttPacket for PubCompPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PubComp
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        encode_ack(
            buf,
            PacketType::PubComp,
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
    fn test_pubcomp_roundtrip_both_versions() {
        for version in [ProtocolVersion::V311, ProtocolVersion::V5] {
            let packet = PubCompPacket::new(65535);
            let mut buf = BytesMut::new();
            packet.encode(&mut buf, version).unwrap();
            assert_eq!(&buf[..], &[0x70, 0x02, 0xFF, 0xFF]);

            let fixed_header = FixedHeader::decode(&mut buf).unwrap();
            let decoded = PubCompPacket::decode_body(&mut buf, &fixed_header, version).unwrap();
            assert_eq!(decoded, packet);
        }
    }
}
