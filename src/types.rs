//! Configuration and result types exchanged with the application

use crate::constants::defaults;
use crate::packet::publish::PublishPacket;
use crate::protocol::v5::properties::Properties;
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use crate::QoS;
use bytes::Bytes;
use std::time::Duration;

pub use crate::packet::subscribe::{RetainHandling, SubscriptionOptions};

/// Outcome of a completed publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishResult {
    /// `QoS` 0 message written to the transport
    Sent,
    /// `QoS` 1 or 2 exchange completed by the broker
    Acknowledged { packet_id: u16, reason_code: ReasonCode },
}

impl PublishResult {
    #[must_use]
    pub fn packet_id(&self) -> Option<u16> {
        match self {
            Self::Sent => None,
            Self::Acknowledged { packet_id, .. } => Some(*packet_id),
        }
    }
}

/// Outcome of a successful CONNECT/CONNACK exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResult {
    pub session_present: bool,
    /// Client identifier assigned by the server, if it assigned one
    pub assigned_client_id: Option<String>,
}

/// Keep-alive timing relative to the negotiated interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveConfig {
    /// PINGREQ is sent once this share of the interval has passed without
    /// any outgoing packet
    pub ping_interval_percent: u8,
    /// The connection is declared dead if PINGRESP has not arrived after
    /// this share of the interval
    pub timeout_percent: u8,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            ping_interval_percent: defaults::PING_INTERVAL_PERCENT,
            timeout_percent: defaults::PINGRESP_TIMEOUT_PERCENT,
        }
    }
}

impl KeepAliveConfig {
    #[must_use]
    pub fn new(ping_interval_percent: u8, timeout_percent: u8) -> Self {
        Self {
            ping_interval_percent,
            timeout_percent,
        }
    }

    #[must_use]
    pub fn ping_interval(&self, keep_alive: Duration) -> Duration {
        keep_alive * u32::from(self.ping_interval_percent) / 100
    }

    #[must_use]
    pub fn timeout(&self, keep_alive: Duration) -> Duration {
        keep_alive * u32::from(self.timeout_percent) / 100
    }
}

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    pub protocol_version: ProtocolVersion,
    /// Requested keep-alive; zero disables keep-alive
    pub keep_alive: Duration,
    pub clean_start: bool,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub will: Option<WillMessage>,
    pub properties: ConnectProperties,
    pub keep_alive_config: KeepAliveConfig,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            protocol_version: ProtocolVersion::V5,
            keep_alive: defaults::KEEP_ALIVE,
            clean_start: true,
            username: None,
            password: None,
            will: None,
            properties: ConnectProperties::default(),
            keep_alive_config: KeepAliveConfig::default(),
        }
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_protocol_version(mut self, version: ProtocolVersion) -> Self {
        self.protocol_version = version;
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, duration: Duration) -> Self {
        self.keep_alive = duration;
        self
    }

    #[must_use]
    pub fn with_keep_alive_config(mut self, config: KeepAliveConfig) -> Self {
        self.keep_alive_config = config;
        self
    }

    #[must_use]
    pub fn with_clean_start(mut self, clean: bool) -> Self {
        self.clean_start = clean;
        self
    }

    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<Vec<u8>>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn with_will(mut self, will: WillMessage) -> Self {
        self.will = Some(will);
        self
    }

    #[must_use]
    pub fn with_session_expiry_interval(mut self, interval: u32) -> Self {
        self.properties.session_expiry_interval = Some(interval);
        self
    }

    #[must_use]
    pub fn with_receive_maximum(mut self, receive_maximum: u16) -> Self {
        self.properties.receive_maximum = Some(receive_maximum);
        self
    }

    #[must_use]
    pub fn with_maximum_packet_size(mut self, size: u32) -> Self {
        self.properties.maximum_packet_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_topic_alias_maximum(mut self, max: u16) -> Self {
        self.properties.topic_alias_maximum = Some(max);
        self
    }

    #[must_use]
    pub fn with_authentication(mut self, method: impl Into<String>, data: Option<Vec<u8>>) -> Self {
        self.properties.authentication_method = Some(method.into());
        self.properties.authentication_data = data;
        self
    }

    #[must_use]
    pub fn with_user_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties
            .user_properties
            .push((key.into(), value.into()));
        self
    }

    /// Whether the broker keeps the session after the network connection closes
    ///
    /// v5 sessions persist when the Session Expiry Interval is non-zero;
    /// v3.1.1 sessions persist when Clean Session is false.
    #[must_use]
    pub fn session_persists(&self) -> bool {
        if self.protocol_version.is_v5() {
            self.properties.session_expiry_interval.unwrap_or(0) > 0
        } else {
            !self.clean_start
        }
    }

    /// Receive Maximum this client advertises
    #[must_use]
    pub fn receive_maximum(&self) -> u16 {
        self.properties
            .receive_maximum
            .unwrap_or(defaults::RECEIVE_MAXIMUM)
    }

    /// Topic Alias Maximum this client advertises for inbound PUBLISH
    #[must_use]
    pub fn topic_alias_maximum(&self) -> u16 {
        if self.protocol_version.is_v5() {
            self.properties.topic_alias_maximum.unwrap_or(0)
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectProperties {
    pub session_expiry_interval: Option<u32>,
    pub receive_maximum: Option<u16>,
    pub maximum_packet_size: Option<u32>,
    pub topic_alias_maximum: Option<u16>,
    pub request_response_information: Option<bool>,
    pub request_problem_information: Option<bool>,
    pub user_properties: Vec<(String, String)>,
    pub authentication_method: Option<String>,
    pub authentication_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WillMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
    pub properties: WillProperties,
}

impl WillMessage {
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            properties: WillProperties::default(),
        }
    }

    #[must_use]
    pub fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: WillProperties) -> Self {
        self.properties = properties;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WillProperties {
    pub will_delay_interval: Option<u32>,
    pub payload_format_indicator: Option<bool>,
    pub message_expiry_interval: Option<u32>,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
    pub user_properties: Vec<(String, String)>,
}

impl From<WillProperties> for Properties {
    fn from(props: WillProperties) -> Self {
        let mut properties = Properties::default();

        if let Some(delay) = props.will_delay_interval {
            properties.set_will_delay_interval(delay);
        }
        if let Some(is_utf8) = props.payload_format_indicator {
            properties.set_payload_format_indicator(is_utf8);
        }
        if let Some(expiry) = props.message_expiry_interval {
            properties.set_message_expiry_interval(expiry);
        }
        if let Some(content_type) = props.content_type {
            properties.set_content_type(content_type);
        }
        if let Some(topic) = props.response_topic {
            properties.set_response_topic(topic);
        }
        if let Some(data) = props.correlation_data {
            properties.set_correlation_data(Bytes::from(data));
        }
        for (key, value) in props.user_properties {
            properties.add_user_property(key, value);
        }

        properties
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    pub qos: QoS,
    pub retain: bool,
    pub properties: PublishProperties,
    /// Substitute a topic alias for the topic when the broker allows it (v5.0)
    pub use_topic_alias: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            qos: QoS::AtMostOnce,
            retain: false,
            properties: PublishProperties::default(),
            use_topic_alias: false,
        }
    }
}

impl PublishOptions {
    #[must_use]
    pub fn new(qos: QoS) -> Self {
        Self {
            qos,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub fn with_topic_alias(mut self, use_topic_alias: bool) -> Self {
        self.use_topic_alias = use_topic_alias;
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: PublishProperties) -> Self {
        self.properties = properties;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishProperties {
    pub payload_format_indicator: Option<bool>,
    pub message_expiry_interval: Option<u32>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Vec<u8>>,
    pub content_type: Option<String>,
    pub user_properties: Vec<(String, String)>,
}

impl From<PublishProperties> for Properties {
    fn from(props: PublishProperties) -> Self {
        let mut properties = Properties::default();

        if let Some(is_utf8) = props.payload_format_indicator {
            properties.set_payload_format_indicator(is_utf8);
        }
        if let Some(expiry) = props.message_expiry_interval {
            properties.set_message_expiry_interval(expiry);
        }
        if let Some(topic) = props.response_topic {
            properties.set_response_topic(topic);
        }
        if let Some(data) = props.correlation_data {
            properties.set_correlation_data(Bytes::from(data));
        }
        if let Some(content_type) = props.content_type {
            properties.set_content_type(content_type);
        }
        for (key, value) in props.user_properties {
            properties.add_user_property(key, value);
        }

        properties
    }
}

/// Application message delivered from an inbound PUBLISH
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Full topic, with any topic alias already resolved
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub properties: MessageProperties,
}

impl From<PublishPacket> for Message {
    fn from(packet: PublishPacket) -> Self {
        Self {
            properties: MessageProperties::from(&packet.properties),
            topic: packet.topic_name,
            payload: packet.payload,
            qos: packet.qos,
            retain: packet.retain,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    pub payload_format_indicator: Option<bool>,
    pub message_expiry_interval: Option<u32>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Bytes>,
    pub content_type: Option<String>,
    pub subscription_identifiers: Vec<u32>,
    pub user_properties: Vec<(String, String)>,
}

impl From<&Properties> for MessageProperties {
    fn from(props: &Properties) -> Self {
        Self {
            payload_format_indicator: props.payload_format_indicator().map(|v| v == 1),
            message_expiry_interval: props.message_expiry_interval(),
            response_topic: props.response_topic().map(str::to_string),
            correlation_data: props.correlation_data().cloned(),
            content_type: props.content_type().map(str::to_string),
            subscription_identifiers: props.subscription_identifiers(),
            user_properties: props.user_properties(),
        }
    }
}
