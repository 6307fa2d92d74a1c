use crate::encoding::{decode_u16, decode_u8};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::{Properties, PropertyContext};
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT SUBACK packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub packet_id: u16,
    /// One reason code per requested filter, in request order
    pub reason_codes: Vec<ReasonCode>,
    /// SUBACK properties (v5.0 only)
    pub properties: Properties,
}

impl SubAckPacket {
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

    #[must_use]
    pub fn with_reason_string(mut self, reason: String) -> Self {
        self.properties.set_reason_string(reason);
        self
    }
}

/// v3.1.1 SUBACK return codes are the granted QoS or 0x80
fn to_v311_return_code(code: ReasonCode) -> Option<u8> {
    match code {
        ReasonCode::Success => Some(0x00),
        ReasonCode::GrantedQoS1 => Some(0x01),
        ReasonCode::GrantedQoS2 => Some(0x02),
        ReasonCode::UnspecifiedError => Some(0x80),
        _ => None,
    }
}

fn from_v311_return_code(code: u8) -> Option<ReasonCode> {
    match code {
        0x00 => Some(ReasonCode::Success),
        0x01 => Some(ReasonCode::GrantedQoS1),
        0x02 => Some(ReasonCode::GrantedQoS2),
        0x80 => Some(ReasonCode::UnspecifiedError),
        _ => None,
    }
}

impl MqttPacket for SubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::SubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        if self.reason_codes.is_empty() {
            return Err(MqttError::ProtocolError(
                "SUBACK must contain at least one reason code".to_string(),
            ));
        }

        buf.put_u16(self.packet_id);

        if version.is_v5() {
            self.properties.encode(buf)?;
            for code in &self.reason_codes {
                buf.put_u8(u8::from(*code));
            }
            return Ok(());
        }

        if !self.properties.is_empty() {
            return Err(MqttError::UnsupportedImplementation(
                "SUBACK properties require MQTT 5".to_string(),
            ));
        }
        for code in &self.reason_codes {
            let return_code = to_v311_return_code(*code).ok_or_else(|| {
                MqttError::UnsupportedImplementation(format!(
                    "{code:?} has no MQTT 3.1.1 SUBACK return code"
                ))
            })?;
            buf.put_u8(return_code);
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
                "SUBACK with packet identifier 0".to_string(),
            ));
        }

        let properties = if version.is_v5() {
            let properties = Properties::decode(buf)?;
            properties.validate_for(PropertyContext::Packet(PacketType::SubAck))?;
            properties
        } else {
            Properties::default()
        };

        let mut reason_codes = Vec::with_capacity(buf.remaining());
        while buf.has_remaining() {
            let byte = decode_u8(buf)?;
            let code = if version.is_v5() {
                ReasonCode::decode_for(PacketType::SubAck, byte)?
            } else {
                from_v311_return_code(byte).ok_or_else(|| {
                    MqttError::MalformedPacket(format!("invalid SUBACK return code 0x{byte:02X}"))
                })?
            };
            reason_codes.push(code);
        }

        if reason_codes.is_empty() {
            return Err(MqttError::ProtocolError(
                "SUBACK must contain at least one reason code".to_string(),
            ));
        }

        Ok(Self {
            packet_id,
            reason_codes,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_suback_v311_roundtrip() {
        let packet = SubAckPacket::new(3)
            .add_reason_code(ReasonCode::GrantedQoS1)
            .add_reason_code(ReasonCode::UnspecifiedError);

        let mut buf = BytesMut::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
        assert_eq!(&buf[..], &[0x90, 0x04, 0x00, 0x03, 0x01, 0x80]);

        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        let decoded =
            SubAckPacket::decode_body(&mut buf, &fixed_header, ProtocolVersion::V311).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_suback_v5_preserves_order() {
        let packet = SubAckPacket::new(9)
            .add_reason_code(ReasonCode::GrantedQoS2)
            .add_reason_code(ReasonCode::NotAuthorized)
            .add_reason_code(ReasonCode::Success)
            .with_reason_string("partial".to_string());

        let mut buf = BytesMut::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        let decoded =
            SubAckPacket::decode_body(&mut buf, &fixed_header, ProtocolVersion::V5).unwrap();
        assert_eq!(decoded.reason_codes, packet.reason_codes);
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_suback_invalid_v311_return_code() {
        let mut body: &[u8] = &[0x00, 0x01, 0x87];
        let fixed_header = FixedHeader::new(PacketType::SubAck, 0, 3);
        assert!(matches!(
            SubAckPacket::decode_body(&mut body, &fixed_header, ProtocolVersion::V311),
            Err(MqttError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_suback_without_codes() {
        let mut body: &[u8] = &[0x00, 0x01, 0x00];
        let fixed_header = FixedHeader::new(PacketType::SubAck, 0, 3);
        assert!(matches!(
            SubAckPacket::decode_body(&mut body, &fixed_header, ProtocolVersion::V5),
            Err(MqttError::ProtocolError(_))
        ));
    }
}
