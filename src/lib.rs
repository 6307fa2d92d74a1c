//! # MQTT 3.1.1 / 5.0 client protocol engine
//!
//! The crate is layered:
//!
//! - [`packet`] and [`codec`]: bit-exact encoding and decoding of all fifteen
//!   control packets for both protocol versions, with streaming framing.
//! - [`session`]: packet identifier allocation, flow-control quota, `QoS`
//!   handshakes, topic aliases and session persistence.
//! - [`connection`]: a sans-IO state machine tying the above to the
//!   connection lifecycle and the keep-alive timer.
//! - [`client`]: a tokio driver running a [`Connection`] over any
//!   [`transport::Transport`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use mqtt_engine::transport::TcpTransport;
//! use mqtt_engine::{ConnectOptions, MqttClient, PublishOptions, QoS, TopicFilter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = MqttClient::new(ConnectOptions::new("sensor-7"));
//!     let mut events = client.take_events().await.ok_or("events taken")?;
//!
//!     let stream = TcpTransport::from_addr("127.0.0.1:1883".parse()?).connect().await?;
//!     client.connect(stream).await?;
//!
//!     client
//!         .subscribe(vec![TopicFilter::new("sensors/+/data", QoS::AtLeastOnce)])
//!         .await?;
//!     client
//!         .publish("sensors/7/data", b"25.5".to_vec(), PublishOptions::new(QoS::ExactlyOnce))
//!         .await?
//!         .wait()
//!         .await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]

pub mod client;
pub mod codec;
pub mod connection;
pub mod constants;
pub mod encoding;
pub mod error;
pub mod flags;
pub mod keepalive;
pub mod packet;
pub mod packet_id;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;
pub mod validation;

pub use client::{ClientConfig, ClientEvent, MqttClient, PublishHandle};
pub use codec::{decode_packet, encode_packet, PacketCodec};
pub use connection::{Connection, ConnectionState, Event};
pub use error::{MqttError, Result};
pub use packet::publish::PublishPacket;
pub use packet::subscribe::TopicFilter;
pub use packet::{FixedHeader, Packet, PacketType};
pub use packet_id::PacketIdAllocator;
pub use protocol::v5::properties::{Properties, PropertyId, PropertyValue};
pub use protocol::v5::reason_codes::ReasonCode;
pub use protocol::ProtocolVersion;
pub use session::{FileSessionStore, MemorySessionStore, SessionSnapshot, SessionStore};
pub use types::{
    ConnectOptions, ConnectProperties, ConnectResult, KeepAliveConfig, Message,
    MessageProperties, PublishOptions, PublishProperties, PublishResult, RetainHandling,
    SubscriptionOptions, WillMessage, WillProperties,
};
pub use validation::{
    is_valid_client_id, is_valid_topic_filter, is_valid_topic_name, validate_client_id,
    validate_topic_filter, validate_topic_name,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl QoS {
    /// `None` for the reserved value 3 and anything above it
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(QoS::AtMostOnce),
            1 => Some(QoS::AtLeastOnce),
            2 => Some(QoS::ExactlyOnce),
            _ => None,
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_values() {
        assert_eq!(QoS::AtMostOnce as u8, 0);
        assert_eq!(QoS::AtLeastOnce as u8, 1);
        assert_eq!(QoS::ExactlyOnce as u8, 2);
        assert!(QoS::AtMostOnce < QoS::ExactlyOnce);
    }

    #[test]
    fn test_qos_from_u8() {
        assert_eq!(QoS::from_u8(0), Some(QoS::AtMostOnce));
        assert_eq!(QoS::from_u8(1), Some(QoS::AtLeastOnce));
        assert_eq!(QoS::from_u8(2), Some(QoS::ExactlyOnce));
        assert_eq!(QoS::from_u8(3), None);
        assert_eq!(QoS::from_u8(255), None);
    }

    #[test]
    fn test_qos_into_u8() {
        assert_eq!(u8::from(QoS::AtMostOnce), 0);
        assert_eq!(u8::from(QoS::ExactlyOnce), 2);
    }
}
