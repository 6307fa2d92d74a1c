use crate::encoding::{decode_string, decode_u16, encode_string};
use crate::error::{MqttError, Result};
use crate::flags::PublishFlags;
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::{Properties, PropertyContext};
use crate::protocol::ProtocolVersion;
use crate::QoS;
use bytes::{Buf, BufMut, Bytes};

/// MQTT PUBLISH packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPacket {
    /// Topic name, empty when a v5 Topic Alias stands in for it
    pub topic_name: String,
    /// Packet identifier (present iff `QoS` > 0)
    pub packet_id: Option<u16>,
    /// Message payload
    pub payload: Bytes,
    /// Quality of Service level
    pub qos: QoS,
    /// Retain flag
    pub retain: bool,
    /// Duplicate delivery flag
    pub dup: bool,
    /// PUBLISH properties (v5.0 only)
    pub properties: Properties,
}

impl PublishPacket {
    /// Creates a new PUBLISH packet
    ///
    /// `QoS` 1 and 2 packets start with identifier 0; the session assigns the
    /// real one before the packet is encoded.
    #[must_use]
    pub fn new(topic_name: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            Some(0)
        };

        Self {
            topic_name: topic_name.into(),
            packet_id,
            payload: payload.into(),
            qos,
            retain: false,
            dup: false,
            properties: Properties::default(),
        }
    }

    /// Sets the packet identifier
    #[must_use]
    pub fn with_packet_id(mut self, id: u16) -> Self {
        if self.qos != QoS::AtMostOnce {
            self.packet_id = Some(id);
        }
        self
    }

    /// Sets the retain flag
    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    /// Sets the duplicate flag
    #[must_use]
    pub fn with_dup(mut self, dup: bool) -> Self {
        self.dup = dup;
        self
    }

    /// Sets the topic alias
    #[must_use]
    pub fn with_topic_alias(mut self, alias: u16) -> Self {
        self.properties.set_topic_alias(alias);
        self
    }

    /// Sets the message expiry interval
    #[must_use]
    pub fn with_message_expiry_interval(mut self, seconds: u32) -> Self {
        self.properties.set_message_expiry_interval(seconds);
        self
    }

    /// Sets the content type
    #[must_use]
    pub fn with_content_type(mut self, content_type: String) -> Self {
        self.properties.set_content_type(content_type);
        self
    }

    /// Adds a user property
    #[must_use]
    pub fn with_user_property(mut self, key: String, value: String) -> Self {
        self.properties.add_user_property(key, value);
        self
    }

    #[must_use]
    pub fn topic_alias(&self) -> Option<u16> {
        self.properties.topic_alias()
    }
}

impl MqttPacket for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish
    }

    fn flags(&self) -> u8 {
        let mut flags = 0u8;

        if self.dup {
            flags |= PublishFlags::Dup as u8;
        }

        flags = PublishFlags::with_qos(flags, self.qos as u8);

        if self.retain {
            flags |= PublishFlags::Retain as u8;
        }

        flags
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        if self.dup && self.qos == QoS::AtMostOnce {
            return Err(MqttError::MalformedPacket(
                "DUP must not be set on a QoS 0 PUBLISH".to_string(),
            ));
        }

        if self.topic_name.is_empty() && (!version.is_v5() || self.topic_alias().is_none()) {
            return Err(MqttError::InvalidTopicName(
                "empty topic name without a topic alias".to_string(),
            ));
        }

        encode_string(buf, &self.topic_name)?;

        if self.qos != QoS::AtMostOnce {
            let packet_id = self.packet_id.filter(|id| *id != 0).ok_or_else(|| {
                MqttError::MalformedPacket("PUBLISH with QoS > 0 requires a packet ID".to_string())
            })?;
            buf.put_u16(packet_id);
        }

        if version.is_v5() {
            self.properties.encode(buf)?;
        } else if !self.properties.is_empty() {
            return Err(MqttError::UnsupportedImplementation(
                "PUBLISH properties require MQTT 5".to_string(),
            ));
        }

        buf.put_slice(&self.payload);
        Ok(())
    }

    fn decode_body<B: Buf>(
        buf: &mut B,
        fixed_header: &FixedHeader,
        version: ProtocolVersion,
    ) -> Result<Self> {
        // Parse flags using BeBytes decomposition
        let flags = PublishFlags::decompose(fixed_header.flags);
        let dup = flags.contains(&PublishFlags::Dup);
        let retain = flags.contains(&PublishFlags::Retain);
        let qos_val = PublishFlags::extract_qos(fixed_header.flags);
        let qos = QoS::from_u8(qos_val).ok_or_else(|| {
            MqttError::MalformedPacket(format!("invalid PUBLISH QoS {qos_val}"))
        })?;

        if dup && qos == QoS::AtMostOnce {
            return Err(MqttError::MalformedPacket(
                "DUP set on a QoS 0 PUBLISH".to_string(),
            ));
        }

        let topic_name = decode_string(buf)?;
        if topic_name.contains(['+', '#']) {
            return Err(MqttError::ProtocolError(format!(
                "PUBLISH topic '{topic_name}' contains wildcards"
            )));
        }

        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            let id = decode_u16(buf)?;
            if id == 0 {
                return Err(MqttError::MalformedPacket(
                    "PUBLISH with packet identifier 0".to_string(),
                ));
            }
            Some(id)
        };

        let properties = if version.is_v5() {
            let properties = Properties::decode(buf)?;
            properties.validate_for(PropertyContext::Packet(PacketType::Publish))?;
            properties
        } else {
            Properties::default()
        };

        if topic_name.is_empty() && properties.topic_alias().is_none() {
            return Err(MqttError::ProtocolError(
                "PUBLISH with empty topic and no topic alias".to_string(),
            ));
        }

        // Payload is everything left in the body
        let payload = buf.copy_to_bytes(buf.remaining());

        tracing::trace!(
            topic = %topic_name,
            ?packet_id,
            ?qos,
            payload_len = payload.len(),
            "decoded PUBLISH"
        );

        Ok(Self {
            topic_name,
            packet_id,
            payload,
            qos,
            retain,
            dup,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use crate::protocol::v5::properties::PropertyId;
    use bytes::BytesMut;

    fn roundtrip(packet: &PublishPacket, version: ProtocolVersion) -> PublishPacket {
        let mut buf = BytesMut::new();
        packet.encode(&mut buf, version).unwrap();
        let fixed_header = FixedHeader::decode(&mut buf).unwrap();
        PublishPacket::decode_body(&mut buf, &fixed_header, version).unwrap()
    }

    #[test]
    fn test_publish_flags() {
        let packet = PublishPacket::new("topic", &b"data"[..], QoS::AtMostOnce);
        assert_eq!(packet.flags(), 0x00);

        let packet =
            PublishPacket::new("topic", &b"data"[..], QoS::AtLeastOnce).with_retain(true);
        assert_eq!(packet.flags(), 0x03);

        let packet = PublishPacket::new("topic", &b"data"[..], QoS::ExactlyOnce)
            .with_dup(true)
            .with_retain(true);
        assert_eq!(packet.flags(), 0x0D);
    }

    #[test]
    fn test_publish_qos2_exact_bytes() {
        let packet = PublishPacket::new("a/b", Bytes::new(), QoS::ExactlyOnce).with_packet_id(5);

        let mut buf = BytesMut::new();
        packet.encode(&mut buf, ProtocolVersion::V311).unwrap();
        assert_eq!(&buf[..], &[0x34, 0x07, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x05]);

        let mut buf = BytesMut::new();
        packet.encode(&mut buf, ProtocolVersion::V5).unwrap();
        assert_eq!(
            &buf[..],
            &[0x34, 0x08, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x05, 0x00]
        );
    }

    #[test]
    fn test_publish_roundtrip_both_versions() {
        let packet = PublishPacket::new("sensor/temperature", &b"23.5"[..], QoS::AtLeastOnce)
            .with_packet_id(456)
            .with_retain(true);
        assert_eq!(roundtrip(&packet, ProtocolVersion::V311), packet);
        assert_eq!(roundtrip(&packet, ProtocolVersion::V5), packet);
    }

    #[test]
    fn test_publish_with_properties() {
        let packet = PublishPacket::new("test/props", &b"data"[..], QoS::ExactlyOnce)
            .with_packet_id(789)
            .with_message_expiry_interval(7200)
            .with_content_type("application/json".to_string())
            .with_user_property("a".to_string(), "1".to_string())
            .with_user_property("a".to_string(), "2".to_string());

        let decoded = roundtrip(&packet, ProtocolVersion::V5);
        assert_eq!(decoded.properties.message_expiry_interval(), Some(7200));
        assert_eq!(decoded.properties.content_type(), Some("application/json"));
        assert_eq!(
            decoded.properties.user_properties(),
            vec![
                ("a".to_string(), "1".to_string()),
                ("a".to_string(), "2".to_string())
            ]
        );
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_publish_alias_only_topic() {
        let packet = PublishPacket::new("", &b"x"[..], QoS::AtMostOnce).with_topic_alias(3);
        let decoded = roundtrip(&packet, ProtocolVersion::V5);
        assert!(decoded.topic_name.is_empty());
        assert_eq!(decoded.topic_alias(), Some(3));
        assert!(decoded.properties.contains(PropertyId::TopicAlias));

        let mut buf = BytesMut::new();
        assert!(packet.encode(&mut buf, ProtocolVersion::V311).is_err());
    }

    #[test]
    fn test_publish_empty_topic_without_alias_is_protocol_error() {
        // topic "", no properties
        let mut buf: &[u8] = &[0x00, 0x00, 0x00];
        let fixed_header = FixedHeader::new(PacketType::Publish, 0x00, 3);
        assert!(matches!(
            PublishPacket::decode_body(&mut buf, &fixed_header, ProtocolVersion::V5),
            Err(MqttError::ProtocolError(_))
        ));
    }

    #[test]
    fn test_publish_zero_packet_id_is_malformed() {
        let mut buf: &[u8] = &[0x00, 0x01, b't', 0x00, 0x00];
        let fixed_header = FixedHeader::new(PacketType::Publish, 0x02, 5);
        assert!(matches!(
            PublishPacket::decode_body(&mut buf, &fixed_header, ProtocolVersion::V311),
            Err(MqttError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_publish_missing_packet_id_is_malformed() {
        let mut buf = BytesMut::new();
        encode_string(&mut buf, "topic").unwrap();
        let len = u32::try_from(buf.len()).unwrap();

        let fixed_header = FixedHeader::new(PacketType::Publish, 0x02, len);
        let mut body = buf.freeze();
        assert!(matches!(
            Packet::decode_from_body(&fixed_header, &mut body, ProtocolVersion::V311),
            Err(MqttError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_publish_wildcard_topic_rejected() {
        let mut buf: &[u8] = &[0x00, 0x03, b'a', b'/', b'#'];
        let fixed_header = FixedHeader::new(PacketType::Publish, 0x00, 5);
        assert!(matches!(
            PublishPacket::decode_body(&mut buf, &fixed_header, ProtocolVersion::V311),
            Err(MqttError::ProtocolError(_))
        ));
    }
}
