use crate::encoding::decode_u8;
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::{Properties, PropertyContext};
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT DISCONNECT packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectPacket {
    pub reason_code: ReasonCode,
    /// DISCONNECT properties (v5.0 only)
    pub properties: Properties,
}

impl Default for DisconnectPacket {
    fn default() -> Self {
        Self::new(ReasonCode::Success)
    }
}

impl DisconnectPacket {
    #[must_use]
    pub fn new(reason_code: ReasonCode) -> Self {
        Self {
            reason_code,
            properties: Properties::default(),
        }
    }

    #[must_use]
    pub fn with_reason_string(mut self, reason: String) -> Self {
        self.properties.set_reason_string(reason);
        self
    }

    #[must_use]
    pub fn with_session_expiry_interval(mut self, interval: u32) -> Self {
        self.properties.set_session_expiry_interval(interval);
        self
    }

    #[must_use]
    pub fn with_server_reference(mut self, reference: String) -> Self {
        self.properties.set_server_reference(reference);
        self
    }
}

impl MqttPacket for DisconnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Disconnect
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        if !version.is_v5() {
            if self.reason_code != ReasonCode::Success || !self.properties.is_empty() {
                return Err(MqttError::UnsupportedImplementation(
                    "DISCONNECT reason codes and properties require MQTT 5".to_string(),
                ));
            }
            return Ok(());
        }

        // Normal disconnection without properties has an empty body
        if self.reason_code == ReasonCode::Success && self.properties.is_empty() {
            return Ok(());
        }

        buf.put_u8(u8::from(self.reason_code));
        if !self.properties.is_empty() {
            self.properties.encode(buf)?;
        }
        Ok(())
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        fixed_header: &FixedHeader,
        version: ProtocolVersion,
    ) -> Result<Self> {
        if !version.is_v5() || fixed_header.remaining_length == 0 {
            return Ok(Self::default());
        }

        let reason_code = ReasonCode::decode_for(PacketType::Disconnect, decode_u8(buf)?)?;

        let properties = if fixed_header.remaining_length > 1 {
            let properties = Properties::decode(buf)?;
            properties.validate_for(PropertyContext::Packet(PacketType::Disconnect))?;
            properties
        } else {
            Properties::default()
        };

        Ok(Self {
            reason_code,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encode(packet: &DisconnectPacket, version: ProtocolVersion) -> BytesMut {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, version).unwrap();
        buf
    }

    #[test]
    fn test_disconnect_normal_is_two_bytes() {
        for version in [ProtocolVersion::V311, ProtocolVersion::V5] {
            let buf = encode(&DisconnectPacket::default(), version);
            assert_eq!(&buf[..], &[0xE0, 0x00]);
        }
    }

    #[test]
    fn test_disconnect_reason_forms() {
        let buf = encode(
            &DisconnectPacket::new(ReasonCode::MalformedPacket),
            ProtocolVersion::V5,
        );
        assert_eq!(&buf[..], &[0xE0, 0x01, 0x81]);

        let packet = DisconnectPacket::new(ReasonCode::ServerShuttingDown)
            .with_reason_string("maintenance".to_string());
        let mut buf = encode(&packet, ProtocolVersion::V5);
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        let decoded =
            DisconnectPacket::decode_body(&mut buf, &fixed_header, ProtocolVersion::V5).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_disconnect_v311_rejects_reason() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            DisconnectPacket::new(ReasonCode::ProtocolError)
                .encode(&mut buf, ProtocolVersion::V311),
            Err(MqttError::UnsupportedImplementation(_))
        ));
    }

    #[test]
    fn test_disconnect_invalid_reason() {
        let mut body: &[u8] = &[0x01];
        let fixed_header = FixedHeader::new(PacketType::Disconnect, 0, 1);
        assert!(matches!(
            DisconnectPacket::decode_body(&mut body, &fixed_header, ProtocolVersion::V5),
            Err(MqttError::ProtocolError(_))
        ));
    }
}
