use crate::encoding::{decode_u16, decode_u8};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::{Properties, PropertyContext};
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT UNSUBACK packet
///
/// A v3.1.1 UNSUBACK carries only the packet identifier, so `reason_codes`
/// is empty after decoding one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubAckPacket {
    pub packet_id: u16,
    /// One reason code per requested filter, in request order (v5.0 only)
    pub reason_codes: Vec<ReasonCode>,
    /// UNSUBACK properties (v5.0 only)
    pub properties: Properties,
}

impl UnsubAckPacket {
    #[must_use]
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            reason_codes: Vec::new(),
            properties: Properties::default(),
        }
    }

    #[must_use]
    pub fn add_reason_code(mut self, code: ReasonCode) -> Self {
        self.reason_codes.push(code);
        self
    }
}

impl MqttPacket for UnsubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::UnsubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        buf.put_u16(self.packet_id);

        if !version.is_v5() {
            if !self.properties.is_empty()
                || self.reason_codes.iter().any(|code| *code != ReasonCode::Success)
            {
                return Err(MqttError::UnsupportedImplementation(
                    "UNSUBACK reason codes and properties require MQTT 5".to_string(),
                ));
            }
            return Ok(());
        }

        if self.reason_codes.is_empty() {
            return Err(MqttError::ProtocolError(
                "UNSUBACK must contain at least one reason code".to_string(),
            ));
        }

        self.properties.encode(buf)?;
        for code in &self.reason_codes {
            buf.put_u8(u8::from(*code));
        }
        Ok(())
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        _fixed_header: &FixedHeader,
        version: ProtocolVersion,
    ) -> Result<Self> {
        let packet_id = decode_u16(buf)?;
        if packet_id == 0 {
            return Err(MqttError::MalformedPacket(
                "UNSUBACK with packet identifier 0".to_string(),
            ));
        }

        if !version.is_v5() {
            return Ok(Self::new(packet_id));
        }

        let properties = Properties::decode(buf)?;
        properties.validate_for(PropertyContext::Packet(PacketType::UnsubAck))?;

        let mut reason_codes = Vec::with_capacity(buf.remaining());
        while buf.has_remaining() {
            reason_codes.push(ReasonCode::decode_for(
                PacketType::UnsubAck,
                decode_u8(buf)?,
            )?);
        }

        if reason_codes.is_empty() {
            return Err(MqttError::ProtocolError(
                "UNSUBACK must contain at least one reason code".to_string(),
            ));
        }

        Ok(Self {
            packet_id,
            reason_codes,
            properties,
        })
    }
}
