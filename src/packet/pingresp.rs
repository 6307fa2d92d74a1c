use crate::error::Result;
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT PINGRESP packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PingRespPacket;

impl MqttPacket for PingRespPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PingResp
    }

    fn encode_body<B: BufMut>(&self, _buf: &mut B, _version: ProtocolVersion) -> Result<()> {
        // Everything is in the fixed header
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
