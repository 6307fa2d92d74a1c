use crate::error::Result;
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT PINGREQ packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingReqPacket;

impl MqttPacket for PingReqPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PingReq
    }

    fn encode_body<B: BufMut>(&self, _buf: &mut B, _version: ProtocolVersion) -> Result<()> {
        // PINGREQ has no variable header or payload
        Ok(())
    }

    fn decode_body<B: Buf>(
        _buf: &mut B,
        _fixed_header: &FixedHeader,
        _version: ProtocolVersion,
    ) -> Result<Self> {
        Ok(Self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::packets::PINGREQ_BYTES;
    use bytes::BytesMut;

    #[test]
    fn test_pingreq_encode_decode() {
        for version in [ProtocolVersion::V311, ProtocolVersion::V5] {
            let mut buf = BytesMut::new();
            PingReqPacket.encode(&mut buf, version).unwrap();
            assert_eq!(&buf[..], &PINGREQ_BYTES);

            let fixed_header = FixedHeader::decode(&mut buf).unwrap();
            assert_eq!(fixed_header.packet_type, PacketType::PingReq);
            assert_eq!(fixed_header.remaining_length, 0);
            assert_eq!(
                PingReqPacket::decode_body(&mut buf, &fixed_header, version).unwrap(),
                PingReqPacket
            );
        }
    }
}
