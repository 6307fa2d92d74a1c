use crate::constants::subscription::V311_RESERVED_BITS_MASK;
use crate::encoding::{decode_string, decode_u16, decode_u8, encode_string};
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::protocol::v5::properties::{Properties, PropertyContext};
use crate::protocol::ProtocolVersion;
use crate::QoS;
use bebytes::BeBytes;
use bytes::{Buf, BufMut};

/// Subscription options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionOptions {
    /// Maximum `QoS` level the client will accept
    pub qos: QoS,
    /// No Local: messages published by this connection are not forwarded back to it (v5.0)
    pub no_local: bool,
    /// Retain As Published: keep the RETAIN flag as published (v5.0)
    pub retain_as_published: bool,
    /// Retain Handling option (v5.0)
    pub retain_handling: RetainHandling,
}

/// Retain handling options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum RetainHandling {
    /// Send retained messages at subscribe time
    #[default]
    SendAtSubscribe = 0,
    /// Send retained messages at subscribe time only if subscription doesn't exist
    SendAtSubscribeIfNew = 1,
    /// Don't send retained messages at subscribe time
    DoNotSend = 2,
}

impl RetainHandling {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::SendAtSubscribe),
            1 => Some(Self::SendAtSubscribeIfNew),
            2 => Some(Self::DoNotSend),
            _ => None,
        }
    }
}

/// Subscription options byte as bit fields, MSB first
#[derive(Debug, Clone, Copy, PartialEq, Eq, BeBytes)]
pub struct SubscriptionOptionsBits {
    /// Reserved bits (bits 7-6) - must be 0
    #[bits(2)]
    pub reserved_bits: u8,
    /// Retain Handling (bits 5-4)
    #[bits(2)]
    pub retain_handling: u8,
    /// Retain As Published flag (bit 3)
    #[bits(1)]
    pub retain_as_published: u8,
    /// No Local flag (bit 2)
    #[bits(1)]
    pub no_local: u8,
    /// QoS level (bits 1-0)
    #[bits(2)]
    pub qos: u8,
}

impl SubscriptionOptionsBits {
    #[must_use]
    pub fn from_options(options: &SubscriptionOptions) -> Self {
        Self {
            reserved_bits: 0,
            retain_handling: options.retain_handling as u8,
            retain_as_published: u8::from(options.retain_as_published),
            no_local: u8::from(options.no_local),
            qos: options.qos as u8,
        }
    }

    /// # Errors
    ///
    /// Returns `MalformedPacket` if reserved bits are set or a field is out of range
    pub fn to_options(&self) -> Result<SubscriptionOptions> {
        if self.reserved_bits != 0 {
            return Err(MqttError::MalformedPacket(
                "reserved bits in subscription options must be 0".to_string(),
            ));
        }

        let qos = QoS::from_u8(self.qos).ok_or_else(|| {
            MqttError::MalformedPacket(format!(
                "invalid QoS value in subscription options: {}",
                self.qos
            ))
        })?;

        let retain_handling = RetainHandling::from_u8(self.retain_handling).ok_or_else(|| {
            MqttError::MalformedPacket(format!(
                "invalid retain handling value: {}",
                self.retain_handling
            ))
        })?;

        Ok(SubscriptionOptions {
            qos,
            no_local: self.no_local != 0,
            retain_as_published: self.retain_as_published != 0,
            retain_handling,
        })
    }
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            qos: QoS::AtMostOnce,
            no_local: false,
            retain_as_published: false,
            retain_handling: RetainHandling::SendAtSubscribe,
        }
    }
}

impl SubscriptionOptions {
    /// Creates subscription options with the specified `QoS`
    #[must_use]
    pub fn new(qos: QoS) -> Self {
        Self {
            qos,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub fn with_no_local(mut self, no_local: bool) -> Self {
        self.no_local = no_local;
        self
    }

    #[must_use]
    pub fn with_retain_as_published(mut self, retain_as_published: bool) -> Self {
        self.retain_as_published = retain_as_published;
        self
    }

    #[must_use]
    pub fn with_retain_handling(mut self, retain_handling: RetainHandling) -> Self {
        self.retain_handling = retain_handling;
        self
    }

    /// Encodes the options byte for the given protocol version
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedImplementation` if v5-only options are requested
    /// under v3.1.1
    pub fn encode(&self, version: ProtocolVersion) -> Result<u8> {
        if version.is_v5() {
            return Ok(SubscriptionOptionsBits::from_options(self).to_be_bytes()[0]);
        }

        if *self != Self::new(self.qos) {
            return Err(MqttError::UnsupportedImplementation(
                "subscription options other than QoS require MQTT 5".to_string(),
            ));
        }
        Ok(self.qos as u8)
    }

    /// Decodes the options byte for the given protocol version
    ///
    /// # Errors
    ///
    /// Returns `MalformedPacket` if reserved bits are set or a field is out of range
    pub fn decode(byte: u8, version: ProtocolVersion) -> Result<Self> {
        if !version.is_v5() && byte & V311_RESERVED_BITS_MASK != 0 {
            return Err(MqttError::MalformedPacket(format!(
                "reserved bits set in MQTT 3.1.1 requested QoS byte 0x{byte:02X}"
            )));
        }

        let (bits, _consumed) =
            SubscriptionOptionsBits::try_from_be_bytes(&[byte]).map_err(|e| {
                MqttError::MalformedPacket(format!("invalid subscription options byte: {e:?}"))
            })?;

        bits.to_options()
    }
}

/// Topic filter with subscription options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    /// Topic filter string (may contain wildcards)
    pub filter: String,
    pub options: SubscriptionOptions,
}

impl TopicFilter {
    #[must_use]
    pub fn new(filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            filter: filter.into(),
            options: SubscriptionOptions::new(qos),
        }
    }

    #[must_use]
    pub fn with_options(filter: impl Into<String>, options: SubscriptionOptions) -> Self {
        Self {
            filter: filter.into(),
            options,
        }
    }
}

/// MQTT SUBSCRIBE packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    /// Topic filters to subscribe to, in request order
    pub filters: Vec<TopicFilter>,
    /// SUBSCRIBE properties (v5.0 only)
    pub properties: Properties,
}

impl SubscribePacket {
    #[must_use]
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            filters: Vec::new(),
            properties: Properties::default(),
        }
    }

    #[must_use]
    pub fn add_filter(mut self, filter: impl Into<String>, qos: QoS) -> Self {
        self.filters.push(TopicFilter::new(filter, qos));
        self
    }

    #[must_use]
    pub fn add_filter_with_options(mut self, filter: TopicFilter) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use]
    pub fn with_subscription_identifier(mut self, id: u32) -> Self {
        self.properties.add_subscription_identifier(id);
        self
    }

    #[must_use]
    pub fn with_user_property(mut self, key: String, value: String) -> Self {
        self.properties.add_user_property(key, value);
        self
    }
}

impl MqttPacket for SubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Subscribe
    }

    fn flags(&self) -> u8 {
        0x02 // SUBSCRIBE must have flags = 0x02
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        if self.packet_id == 0 {
            return Err(MqttError::MalformedPacket(
                "SUBSCRIBE requires a non-zero packet identifier".to_string(),
            ));
        }
        if self.filters.is_empty() {
            return Err(MqttError::ProtocolError(
                "SUBSCRIBE must contain at least one topic filter".to_string(),
            ));
        }

        buf.put_u16(self.packet_id);

        if version.is_v5() {
            self.properties.encode(buf)?;
        } else if !self.properties.is_empty() {
            return Err(MqttError::UnsupportedImplementation(
                "SUBSCRIBE properties require MQTT 5".to_string(),
            ));
        }

        for filter in &self.filters {
            encode_string(buf, &filter.filter)?;
            buf.put_u8(filter.options.encode(version)?);
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
                "SUBSCRIBE with packet identifier 0".to_string(),
            ));
        }

        let properties = if version.is_v5() {
            let properties = Properties::decode(buf)?;
            properties.validate_for(PropertyContext::Packet(PacketType::Subscribe))?;
            properties
        } else {
            Properties::default()
        };

        let mut filters = Vec::new();
        while buf.has_remaining() {
            let filter = decode_string(buf)?;
            let options = SubscriptionOptions::decode(decode_u8(buf)?, version)?;
            filters.push(TopicFilter { filter, options });
        }

        if filters.is_empty() {
            return Err(MqttError::ProtocolError(
                "SUBSCRIBE must contain at least one topic filter".to_string(),
            ));
        }

        Ok(Self {
            packet_id,
            filters,
            properties,
        })
    }
}
