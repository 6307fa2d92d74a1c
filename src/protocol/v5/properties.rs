use crate::encoding::{
    decode_binary, decode_string, decode_string_pair, decode_u16, decode_u32, decode_u8,
    decode_variable_int, encode_binary, encode_string, encode_variable_int,
};
use crate::error::{MqttError, Result};
use crate::packet::PacketType;
use bytes::{Buf, BufMut, Bytes};
use std::collections::BTreeMap;

/// MQTT v5.0 Property Identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyId {
    // Byte properties
    PayloadFormatIndicator = 0x01,
    RequestProblemInformation = 0x17,
    RequestResponseInformation = 0x19,
    MaximumQoS = 0x24,
    RetainAvailable = 0x25,
    WildcardSubscriptionAvailable = 0x28,
    SubscriptionIdentifierAvailable = 0x29,
    SharedSubscriptionAvailable = 0x2A,

    // Two Byte Integer properties
    ServerKeepAlive = 0x13,
    ReceiveMaximum = 0x21,
    TopicAliasMaximum = 0x22,
    TopicAlias = 0x23,

    // Four Byte Integer properties
    MessageExpiryInterval = 0x02,
    SessionExpiryInterval = 0x11,
    WillDelayInterval = 0x18,
    MaximumPacketSize = 0x27,

    // Variable Byte Integer properties
    SubscriptionIdentifier = 0x0B,

    // UTF-8 Encoded String properties
    ContentType = 0x03,
    ResponseTopic = 0x08,
    AssignedClientIdentifier = 0x12,
    AuthenticationMethod = 0x15,
    ResponseInformation = 0x1A,
    ServerReference = 0x1C,
    ReasonString = 0x1F,

    // Binary Data properties
    CorrelationData = 0x09,
    AuthenticationData = 0x16,

    // UTF-8 String Pair properties
    UserProperty = 0x26,
}

impl PropertyId {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::PayloadFormatIndicator),
            0x02 => Some(Self::MessageExpiryInterval),
            0x03 => Some(Self::ContentType),
            0x08 => Some(Self::ResponseTopic),
            0x09 => Some(Self::CorrelationData),
            0x0B => Some(Self::SubscriptionIdentifier),
            0x11 => Some(Self::SessionExpiryInterval),
            0x12 => Some(Self::AssignedClientIdentifier),
            0x13 => Some(Self::ServerKeepAlive),
            0x15 => Some(Self::AuthenticationMethod),
            0x16 => Some(Self::AuthenticationData),
            0x17 => Some(Self::RequestProblemInformation),
            0x18 => Some(Self::WillDelayInterval),
            0x19 => Some(Self::RequestResponseInformation),
            0x1A => Some(Self::ResponseInformation),
            0x1C => Some(Self::ServerReference),
            0x1F => Some(Self::ReasonString),
            0x21 => Some(Self::ReceiveMaximum),
            0x22 => Some(Self::TopicAliasMaximum),
            0x23 => Some(Self::TopicAlias),
            0x24 => Some(Self::MaximumQoS),
            0x25 => Some(Self::RetainAvailable),
            0x26 => Some(Self::UserProperty),
            0x27 => Some(Self::MaximumPacketSize),
            0x28 => Some(Self::WildcardSubscriptionAvailable),
            0x29 => Some(Self::SubscriptionIdentifierAvailable),
            0x2A => Some(Self::SharedSubscriptionAvailable),
            _ => None,
        }
    }

    /// Checks if this property can appear multiple times in a packet
    #[must_use]
    pub fn allows_multiple(&self) -> bool {
        matches!(self, Self::UserProperty | Self::SubscriptionIdentifier)
    }

    #[must_use]
    pub fn value_type(&self) -> PropertyValueType {
        match self {
            Self::PayloadFormatIndicator
            | Self::RequestProblemInformation
            | Self::RequestResponseInformation
            | Self::MaximumQoS
            | Self::RetainAvailable
            | Self::WildcardSubscriptionAvailable
            | Self::SubscriptionIdentifierAvailable
            | Self::SharedSubscriptionAvailable => PropertyValueType::Byte,

            Self::ServerKeepAlive
            | Self::ReceiveMaximum
            | Self::TopicAliasMaximum
            | Self::TopicAlias => PropertyValueType::TwoByteInteger,

            Self::MessageExpiryInterval
            | Self::SessionExpiryInterval
            | Self::WillDelayInterval
            | Self::MaximumPacketSize => PropertyValueType::FourByteInteger,

            Self::SubscriptionIdentifier => PropertyValueType::VariableByteInteger,

            Self::ContentType
            | Self::ResponseTopic
            | Self::AssignedClientIdentifier
            | Self::AuthenticationMethod
            | Self::ResponseInformation
            | Self::ServerReference
            | Self::ReasonString => PropertyValueType::Utf8String,

            Self::CorrelationData | Self::AuthenticationData => PropertyValueType::BinaryData,

            Self::UserProperty => PropertyValueType::Utf8StringPair,
        }
    }

    /// Whether the property may appear in the given packet or will
    #[must_use]
    pub fn is_allowed_in(&self, context: PropertyContext) -> bool {
        use PacketType as P;
        use PropertyContext::{Packet, Will};

        match self {
            Self::UserProperty => true,
            Self::PayloadFormatIndicator
            | Self::MessageExpiryInterval
            | Self::ContentType
            | Self::ResponseTopic
            | Self::CorrelationData => matches!(context, Packet(P::Publish) | Will),
            Self::WillDelayInterval => matches!(context, Will),
            Self::SubscriptionIdentifier => {
                matches!(context, Packet(P::Publish | P::Subscribe))
            }
            Self::TopicAlias => matches!(context, Packet(P::Publish)),
            Self::SessionExpiryInterval => {
                matches!(context, Packet(P::Connect | P::ConnAck | P::Disconnect))
            }
            Self::AuthenticationMethod | Self::AuthenticationData => {
                matches!(context, Packet(P::Connect | P::ConnAck | P::Auth))
            }
            Self::RequestProblemInformation | Self::RequestResponseInformation => {
                matches!(context, Packet(P::Connect))
            }
            Self::ReceiveMaximum | Self::TopicAliasMaximum | Self::MaximumPacketSize => {
                matches!(context, Packet(P::Connect | P::ConnAck))
            }
            Self::AssignedClientIdentifier
            | Self::ServerKeepAlive
            | Self::ResponseInformation
            | Self::MaximumQoS
            | Self::RetainAvailable
            | Self::WildcardSubscriptionAvailable
            | Self::SubscriptionIdentifierAvailable
            | Self::SharedSubscriptionAvailable => matches!(context, Packet(P::ConnAck)),
            Self::ServerReference => matches!(context, Packet(P::ConnAck | P::Disconnect)),
            Self::ReasonString => matches!(
                context,
                Packet(
                    P::ConnAck
                        | P::PubAck
                        | P::PubRec
                        | P::PubRel
                        | P::PubComp
                        | P::SubAck
                        | P::UnsubAck
                        | P::Disconnect
                        | P::Auth
                )
            ),
        }
    }
}

/// Where a property set appears on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyContext {
    Packet(PacketType),
    /// The will properties inside CONNECT
    Will,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyValueType {
    Byte,
    TwoByteInteger,
    FourByteInteger,
    VariableByteInteger,
    BinaryData,
    Utf8String,
    Utf8StringPair,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Byte(u8),
    TwoByteInteger(u16),
    FourByteInteger(u32),
    VariableByteInteger(u32),
    BinaryData(Bytes),
    Utf8String(String),
    Utf8StringPair(String, String),
}

impl PropertyValue {
    #[must_use]
    pub fn value_type(&self) -> PropertyValueType {
        match self {
            Self::Byte(_) => PropertyValueType::Byte,
            Self::TwoByteInteger(_) => PropertyValueType::TwoByteInteger,
            Self::FourByteInteger(_) => PropertyValueType::FourByteInteger,
            Self::VariableByteInteger(_) => PropertyValueType::VariableByteInteger,
            Self::BinaryData(_) => PropertyValueType::BinaryData,
            Self::Utf8String(_) => PropertyValueType::Utf8String,
            Self::Utf8StringPair(_, _) => PropertyValueType::Utf8StringPair,
        }
    }

    #[must_use]
    pub fn matches_type(&self, expected: PropertyValueType) -> bool {
        self.value_type() == expected
    }

    fn encoded_len(&self) -> usize {
        match self {
            Self::Byte(_) => 1,
            Self::TwoByteInteger(_) => 2,
            Self::FourByteInteger(_) => 4,
            Self::VariableByteInteger(v) => crate::encoding::variable_int_len(*v),
            Self::BinaryData(v) => crate::encoding::binary_len(v),
            Self::Utf8String(v) => crate::encoding::string_len(v),
            Self::Utf8StringPair(k, v) => {
                crate::encoding::string_len(k) + crate::encoding::string_len(v)
            }
        }
    }
}

/// Container for MQTT v5.0 properties
///
/// Properties are kept in identifier order; repeatable properties keep their
/// values in the order they were added or decoded, so user properties form an
/// ordered sequence of key/value pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    properties: BTreeMap<PropertyId, Vec<PropertyValue>>,
}

impl Properties {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a property value
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` if:
    /// - The value type doesn't match the property's expected type
    /// - The property doesn't allow multiple values and already exists
    pub fn add(&mut self, id: PropertyId, value: PropertyValue) -> Result<()> {
        if !value.matches_type(id.value_type()) {
            return Err(MqttError::ProtocolError(format!(
                "property {:?} expects type {:?}, got {:?}",
                id,
                id.value_type(),
                value.value_type()
            )));
        }

        if !id.allows_multiple() && self.properties.contains_key(&id) {
            return Err(MqttError::ProtocolError(format!(
                "property {id:?} may appear only once"
            )));
        }

        self.properties.entry(id).or_default().push(value);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: PropertyId) -> Option<&PropertyValue> {
        self.properties.get(&id).and_then(|v| v.first())
    }

    #[must_use]
    pub fn get_all(&self, id: PropertyId) -> Option<&[PropertyValue]> {
        self.properties.get(&id).map(Vec::as_slice)
    }

    #[must_use]
    pub fn contains(&self, id: PropertyId) -> bool {
        self.properties.contains_key(&id)
    }

    /// Removes every value of a property, returning them
    pub fn remove(&mut self, id: PropertyId) -> Option<Vec<PropertyValue>> {
        self.properties.remove(&id)
    }

    /// Number of distinct property identifiers
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (PropertyId, &PropertyValue)> + '_ {
        self.properties
            .iter()
            .flat_map(|(id, values)| values.iter().map(move |value| (*id, value)))
    }

    /// Encodes the property length followed by every property
    ///
    /// # Errors
    ///
    /// Returns an error if a string or binary value cannot be encoded
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let mut props_buf = Vec::with_capacity(self.properties_encoded_len());
        self.encode_properties(&mut props_buf)?;

        let len = u32::try_from(props_buf.len()).map_err(|_| MqttError::PacketTooLarge {
            size: props_buf.len(),
            max: crate::encoding::VARIABLE_INT_MAX as usize,
        })?;
        encode_variable_int(buf, len)?;
        buf.put_slice(&props_buf);
        Ok(())
    }

    fn encode_properties<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        for (id, value) in self.iter() {
            buf.put_u8(id as u8);
            match value {
                PropertyValue::Byte(v) => buf.put_u8(*v),
                PropertyValue::TwoByteInteger(v) => buf.put_u16(*v),
                PropertyValue::FourByteInteger(v) => buf.put_u32(*v),
                PropertyValue::VariableByteInteger(v) => encode_variable_int(buf, *v)?,
                PropertyValue::BinaryData(v) => encode_binary(buf, v)?,
                PropertyValue::Utf8String(v) => encode_string(buf, v)?,
                PropertyValue::Utf8StringPair(k, v) => {
                    encode_string(buf, k)?;
                    encode_string(buf, v)?;
                }
            }
        }
        Ok(())
    }

    /// Decodes a property length and the properties it covers
    ///
    /// # Errors
    ///
    /// - `Incomplete` if the buffer is shorter than the declared length
    /// - `MalformedPacket` for an unknown identifier, a repeated non-repeatable
    ///   identifier, or a value overrunning the property section
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let props_len = decode_variable_int(buf)? as usize;

        if buf.remaining() < props_len {
            return Err(MqttError::Incomplete {
                needed: props_len - buf.remaining(),
            });
        }

        let mut props_buf = buf.copy_to_bytes(props_len);
        let mut properties = Self::new();

        while props_buf.has_remaining() {
            let id_byte = props_buf.get_u8();
            let id = PropertyId::from_u8(id_byte).ok_or_else(|| {
                MqttError::MalformedPacket(format!("unknown property identifier 0x{id_byte:02X}"))
            })?;

            let value = Self::decode_value(id, &mut props_buf).map_err(MqttError::into_malformed)?;

            if !id.allows_multiple() && properties.contains(id) {
                return Err(MqttError::MalformedPacket(format!(
                    "property {id:?} repeated"
                )));
            }
            properties.properties.entry(id).or_default().push(value);
        }

        Ok(properties)
    }

    fn decode_value(id: PropertyId, buf: &mut Bytes) -> Result<PropertyValue> {
        Ok(match id.value_type() {
            PropertyValueType::Byte => PropertyValue::Byte(decode_u8(buf)?),
            PropertyValueType::TwoByteInteger => PropertyValue::TwoByteInteger(decode_u16(buf)?),
            PropertyValueType::FourByteInteger => PropertyValue::FourByteInteger(decode_u32(buf)?),
            PropertyValueType::VariableByteInteger => {
                PropertyValue::VariableByteInteger(decode_variable_int(buf)?)
            }
            PropertyValueType::BinaryData => PropertyValue::BinaryData(decode_binary(buf)?),
            PropertyValueType::Utf8String => PropertyValue::Utf8String(decode_string(buf)?),
            PropertyValueType::Utf8StringPair => {
                let (key, value) = decode_string_pair(buf)?;
                PropertyValue::Utf8StringPair(key, value)
            }
        })
    }

    /// Checks that every property belongs in `context` and carries a legal value
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` for a misplaced property or an out-of-range value
    pub fn validate_for(&self, context: PropertyContext) -> Result<()> {
        for (id, value) in self.iter() {
            if !id.is_allowed_in(context) {
                return Err(MqttError::ProtocolError(format!(
                    "property {id:?} is not allowed in {context:?}"
                )));
            }

            let legal = match (id, value) {
                (
                    PropertyId::ReceiveMaximum | PropertyId::TopicAlias,
                    PropertyValue::TwoByteInteger(0),
                )
                | (PropertyId::MaximumPacketSize, PropertyValue::FourByteInteger(0))
                | (PropertyId::SubscriptionIdentifier, PropertyValue::VariableByteInteger(0)) => {
                    false
                }
                (
                    PropertyId::PayloadFormatIndicator
                    | PropertyId::RequestProblemInformation
                    | PropertyId::RequestResponseInformation
                    | PropertyId::MaximumQoS
                    | PropertyId::RetainAvailable
                    | PropertyId::WildcardSubscriptionAvailable
                    | PropertyId::SubscriptionIdentifierAvailable
                    | PropertyId::SharedSubscriptionAvailable,
                    PropertyValue::Byte(v),
                ) => *v <= 1,
                _ => true,
            };

            if !legal {
                return Err(MqttError::ProtocolError(format!(
                    "property {id:?} has illegal value {value:?}"
                )));
            }
        }
        Ok(())
    }

    /// Encoded length including the length prefix
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let props_len = self.properties_encoded_len();
        crate::encoding::variable_int_len(u32::try_from(props_len).unwrap_or(u32::MAX)) + props_len
    }

    fn properties_encoded_len(&self) -> usize {
        self.iter().map(|(_, value)| 1 + value.encoded_len()).sum()
    }

    fn set(&mut self, id: PropertyId, value: PropertyValue) {
        self.properties.insert(id, vec![value]);
    }

    fn get_u8(&self, id: PropertyId) -> Option<u8> {
        match self.get(id) {
            Some(PropertyValue::Byte(v)) => Some(*v),
            _ => None,
        }
    }

    fn get_u16(&self, id: PropertyId) -> Option<u16> {
        match self.get(id) {
            Some(PropertyValue::TwoByteInteger(v)) => Some(*v),
            _ => None,
        }
    }

    fn get_u32(&self, id: PropertyId) -> Option<u32> {
        match self.get(id) {
            Some(PropertyValue::FourByteInteger(v) | PropertyValue::VariableByteInteger(v)) => {
                Some(*v)
            }
            _ => None,
        }
    }

    fn get_str(&self, id: PropertyId) -> Option<&str> {
        match self.get(id) {
            Some(PropertyValue::Utf8String(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    fn get_bytes(&self, id: PropertyId) -> Option<&Bytes> {
        match self.get(id) {
            Some(PropertyValue::BinaryData(v)) => Some(v),
            _ => None,
        }
    }

    // Typed setters replace any existing value

    pub fn set_payload_format_indicator(&mut self, is_utf8: bool) {
        self.set(
            PropertyId::PayloadFormatIndicator,
            PropertyValue::Byte(u8::from(is_utf8)),
        );
    }

    pub fn set_message_expiry_interval(&mut self, seconds: u32) {
        self.set(
            PropertyId::MessageExpiryInterval,
            PropertyValue::FourByteInteger(seconds),
        );
    }

    pub fn set_topic_alias(&mut self, alias: u16) {
        self.set(PropertyId::TopicAlias, PropertyValue::TwoByteInteger(alias));
    }

    pub fn set_response_topic(&mut self, topic: String) {
        self.set(PropertyId::ResponseTopic, PropertyValue::Utf8String(topic));
    }

    pub fn set_correlation_data(&mut self, data: Bytes) {
        self.set(PropertyId::CorrelationData, PropertyValue::BinaryData(data));
    }

    /// Adds a user property (can be called multiple times)
    pub fn add_user_property(&mut self, key: String, value: String) {
        self.properties
            .entry(PropertyId::UserProperty)
            .or_default()
            .push(PropertyValue::Utf8StringPair(key, value));
    }

    pub fn add_subscription_identifier(&mut self, id: u32) {
        self.properties
            .entry(PropertyId::SubscriptionIdentifier)
            .or_default()
            .push(PropertyValue::VariableByteInteger(id));
    }

    pub fn set_session_expiry_interval(&mut self, seconds: u32) {
        self.set(
            PropertyId::SessionExpiryInterval,
            PropertyValue::FourByteInteger(seconds),
        );
    }

    pub fn set_assigned_client_identifier(&mut self, id: String) {
        self.set(
            PropertyId::AssignedClientIdentifier,
            PropertyValue::Utf8String(id),
        );
    }

    pub fn set_server_keep_alive(&mut self, seconds: u16) {
        self.set(
            PropertyId::ServerKeepAlive,
            PropertyValue::TwoByteInteger(seconds),
        );
    }

    pub fn set_authentication_method(&mut self, method: String) {
        self.set(
            PropertyId::AuthenticationMethod,
            PropertyValue::Utf8String(method),
        );
    }

    pub fn set_authentication_data(&mut self, data: Bytes) {
        self.set(
            PropertyId::AuthenticationData,
            PropertyValue::BinaryData(data),
        );
    }

    pub fn set_request_problem_information(&mut self, request: bool) {
        self.set(
            PropertyId::RequestProblemInformation,
            PropertyValue::Byte(u8::from(request)),
        );
    }

    pub fn set_will_delay_interval(&mut self, seconds: u32) {
        self.set(
            PropertyId::WillDelayInterval,
            PropertyValue::FourByteInteger(seconds),
        );
    }

    pub fn set_request_response_information(&mut self, request: bool) {
        self.set(
            PropertyId::RequestResponseInformation,
            PropertyValue::Byte(u8::from(request)),
        );
    }

    pub fn set_server_reference(&mut self, reference: String) {
        self.set(
            PropertyId::ServerReference,
            PropertyValue::Utf8String(reference),
        );
    }

    pub fn set_reason_string(&mut self, reason: String) {
        self.set(PropertyId::ReasonString, PropertyValue::Utf8String(reason));
    }

    pub fn set_receive_maximum(&mut self, max: u16) {
        self.set(PropertyId::ReceiveMaximum, PropertyValue::TwoByteInteger(max));
    }

    pub fn set_topic_alias_maximum(&mut self, max: u16) {
        self.set(
            PropertyId::TopicAliasMaximum,
            PropertyValue::TwoByteInteger(max),
        );
    }

    pub fn set_maximum_qos(&mut self, qos: u8) {
        self.set(PropertyId::MaximumQoS, PropertyValue::Byte(qos));
    }

    pub fn set_retain_available(&mut self, available: bool) {
        self.set(
            PropertyId::RetainAvailable,
            PropertyValue::Byte(u8::from(available)),
        );
    }

    pub fn set_maximum_packet_size(&mut self, size: u32) {
        self.set(
            PropertyId::MaximumPacketSize,
            PropertyValue::FourByteInteger(size),
        );
    }

    pub fn set_content_type(&mut self, content_type: String) {
        self.set(
            PropertyId::ContentType,
            PropertyValue::Utf8String(content_type),
        );
    }

    // Typed getters

    #[must_use]
    pub fn payload_format_indicator(&self) -> Option<u8> {
        self.get_u8(PropertyId::PayloadFormatIndicator)
    }

    #[must_use]
    pub fn message_expiry_interval(&self) -> Option<u32> {
        self.get_u32(PropertyId::MessageExpiryInterval)
    }

    #[must_use]
    pub fn topic_alias(&self) -> Option<u16> {
        self.get_u16(PropertyId::TopicAlias)
    }

    #[must_use]
    pub fn response_topic(&self) -> Option<&str> {
        self.get_str(PropertyId::ResponseTopic)
    }

    #[must_use]
    pub fn correlation_data(&self) -> Option<&Bytes> {
        self.get_bytes(PropertyId::CorrelationData)
    }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.get_str(PropertyId::ContentType)
    }

    #[must_use]
    pub fn session_expiry_interval(&self) -> Option<u32> {
        self.get_u32(PropertyId::SessionExpiryInterval)
    }

    #[must_use]
    pub fn assigned_client_identifier(&self) -> Option<&str> {
        self.get_str(PropertyId::AssignedClientIdentifier)
    }

    #[must_use]
    pub fn server_keep_alive(&self) -> Option<u16> {
        self.get_u16(PropertyId::ServerKeepAlive)
    }

    #[must_use]
    pub fn authentication_method(&self) -> Option<&str> {
        self.get_str(PropertyId::AuthenticationMethod)
    }

    #[must_use]
    pub fn authentication_data(&self) -> Option<&Bytes> {
        self.get_bytes(PropertyId::AuthenticationData)
    }

    #[must_use]
    pub fn will_delay_interval(&self) -> Option<u32> {
        self.get_u32(PropertyId::WillDelayInterval)
    }

    #[must_use]
    pub fn server_reference(&self) -> Option<&str> {
        self.get_str(PropertyId::ServerReference)
    }

    #[must_use]
    pub fn reason_string(&self) -> Option<&str> {
        self.get_str(PropertyId::ReasonString)
    }

    #[must_use]
    pub fn receive_maximum(&self) -> Option<u16> {
        self.get_u16(PropertyId::ReceiveMaximum)
    }

    #[must_use]
    pub fn topic_alias_maximum(&self) -> Option<u16> {
        self.get_u16(PropertyId::TopicAliasMaximum)
    }

    #[must_use]
    pub fn maximum_qos(&self) -> Option<u8> {
        self.get_u8(PropertyId::MaximumQoS)
    }

    #[must_use]
    pub fn retain_available(&self) -> Option<bool> {
        self.get_u8(PropertyId::RetainAvailable).map(|v| v == 1)
    }

    #[must_use]
    pub fn maximum_packet_size(&self) -> Option<u32> {
        self.get_u32(PropertyId::MaximumPacketSize)
    }

    #[must_use]
    pub fn subscription_identifiers(&self) -> Vec<u32> {
        self.get_all(PropertyId::SubscriptionIdentifier)
            .unwrap_or_default()
            .iter()
            .filter_map(|v| match v {
                PropertyValue::VariableByteInteger(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// User properties in wire order
    #[must_use]
    pub fn user_properties(&self) -> Vec<(String, String)> {
        self.get_all(PropertyId::UserProperty)
            .unwrap_or_default()
            .iter()
            .filter_map(|v| match v {
                PropertyValue::Utf8StringPair(k, v) => Some((k.clone(), v.clone())),
                _ => None,
            })
            .collect()
    }
}
