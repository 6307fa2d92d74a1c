use crate::encoding::{decode_string, decode_u16, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::{Properties, PropertyContext};
use crate::protocol::ProtocolVersion;
use bytes::{Buf, BufMut};

/// MQTT UNSUBSCRIBE packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<String>,
    /// UNSUBSCRIBE properties (v5.0 only)
    pub properties: Properties,
}

impl UnsubscribePacket {
    #[must_use]
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            filters: Vec::new(),
            properties: Properties::default(),
        }
    }

    #[must_use]
    pub fn add_filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }

    #[must_use]
    pub fn with_user_property(mut self, key: String, value: String) -> Self {
        self.properties.add_user_property(key, value);
        self
    }
}

impl MqttPacket for UnsubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Unsubscribe
    }

    fn flags(&self) -> u8 {
        0x02 // UNSUBSCRIBE must have flags = 0x02
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        if self.packet_id == 0 {
            return Err(MqttError::MalformedPacket(
                "UNSUBSCRIBE requires a non-zero packet identifier".to_string(),
            ));
        }
        if self.filters.is_empty() {
            return Err(MqttError::ProtocolError(
                "UNSUBSCRIBE must contain at least one topic filter".to_string(),
            ));
        }

        buf.put_u16(self.packet_id);

        if version.is_v5() {
            self.properties.encode(buf)?;
        } else if !self.properties.is_empty() {
            return Err(MqttError::UnsupportedImplementation(
                "UNSUBSCRIBE properties require MQTT 5".to_string(),
            ));
        }

        for filter in &self.filters {
            encode_string(buf, filter)?;
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
                "UNSUBSCRIBE with packet identifier 0".to_string(),
            ));
        }

        let properties = if version.is_v5() {
            let properties = Properties::decode(buf)?;
            properties.validate_for(PropertyContext::Packet(PacketType::Unsubscribe))?;
            properties
        } else {
            Properties::default()
        };

        let mut filters = Vec::new();
        while buf.has_remaining() {
            filters.push(decode_string(buf)?);
        }

        if filters.is_empty() {
            return Err(MqttError::ProtocolError(
                "UNSUBSCRIBE must contain at least one topic filter".to_string(),
            ));
        }

        Ok(Self {
            packet_id,
            filters,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_unsubscribe_roundtrip() {
        for version in [ProtocolVersion::V311, ProtocolVersion::V5] {
            let packet = UnsubscribePacket::new(12)
                .add_filter("a/b")
                .add_filter("c/#");

            let mut buf = BytesMut::new();
            packet.encode(&mut buf, version).unwrap();
            assert_eq!(buf[0], 0xA2);

            let fixed_header = FixedHeader::decode(&mut buf).unwrap();
            let decoded = UnsubscribePacket::decode_body(&mut buf, &fixed_header, version).unwrap();
            assert_eq!(decoded, packet);
        }
    }

    #[test]
    fn test_unsubscribe_requires_filter() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            UnsubscribePacket::new(1).encode(&mut buf, ProtocolVersion::V311),
            Err(MqttError::ProtocolError(_))
        ));

        let mut body: &[u8] = &[0x00, 0x01];
        let fixed_header = FixedHeader::new(PacketType::Unsubscribe, 0x02, 2);
        assert!(matches!(
            UnsubscribePacket::decode_body(&mut body, &fixed_header, ProtocolVersion::V311),
            Err(MqttError::ProtocolError(_))
        ));
    }
}
