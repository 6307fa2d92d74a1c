//! Wire-level constants shared by the codec and the session engine

use crate::packet::PacketType;

/// Fixed header byte 1 values (packet type << 4 | flags)
pub mod fixed_header {
    use super::PacketType;

    pub const CONNECT: u8 = (PacketType::Connect as u8) << 4;
    pub const CONNACK: u8 = (PacketType::ConnAck as u8) << 4;
    /// PUBLISH fixed header base, flags vary per packet
    pub const PUBLISH_BASE: u8 = (PacketType::Publish as u8) << 4;
    pub const PUBACK: u8 = (PacketType::PubAck as u8) << 4;
    pub const PUBREC: u8 = (PacketType::PubRec as u8) << 4;
    /// PUBREL carries the mandatory 0b0010 flags
    pub const PUBREL: u8 = (PacketType::PubRel as u8) << 4 | 0x02;
    pub const PUBCOMP: u8 = (PacketType::PubComp as u8) << 4;
    /// SUBSCRIBE carries the mandatory 0b0010 flags
    pub const SUBSCRIBE: u8 = (PacketType::Subscribe as u8) << 4 | 0x02;
    pub const SUBACK: u8 = (PacketType::SubAck as u8) << 4;
    /// UNSUBSCRIBE carries the mandatory 0b0010 flags
    pub const UNSUBSCRIBE: u8 = (PacketType::Unsubscribe as u8) << 4 | 0x02;
    pub const UNSUBACK: u8 = (PacketType::UnsubAck as u8) << 4;
    pub const PINGREQ: u8 = (PacketType::PingReq as u8) << 4;
    pub const PINGRESP: u8 = (PacketType::PingResp as u8) << 4;
    pub const DISCONNECT: u8 = (PacketType::Disconnect as u8) << 4;
    pub const AUTH: u8 = (PacketType::Auth as u8) << 4;
}

/// Masks for extracting fields from the fixed header and variable byte integers
pub mod masks {
    pub const PACKET_TYPE: u8 = 0xF0;
    pub const FLAGS: u8 = 0x0F;
    pub const CONTINUATION_BIT: u8 = 0x80;
    pub const VARIABLE_BYTE_VALUE: u8 = 0x7F;
}

/// Packets whose encoding never varies
pub mod packets {
    pub const PINGREQ_BYTES: [u8; 2] = [super::fixed_header::PINGREQ, 0x00];
    pub const PINGRESP_BYTES: [u8; 2] = [super::fixed_header::PINGRESP, 0x00];
}

/// Subscription options byte layout
pub mod subscription {
    pub const QOS_MASK: u8 = 0x03;
    pub const NO_LOCAL_MASK: u8 = 0x04;
    pub const RETAIN_AS_PUBLISHED_MASK: u8 = 0x08;
    pub const RETAIN_HANDLING_MASK: u8 = 0x30;
    pub const RETAIN_HANDLING_SHIFT: u8 = 4;
    /// Bits 6-7 are reserved in v5; v3.1.1 reserves bits 2-7
    pub const RESERVED_BITS_MASK: u8 = 0xC0;
    pub const V311_RESERVED_BITS_MASK: u8 = 0xFC;
}

/// CONNECT flags layout
pub mod connect_flags {
    pub const WILL_QOS_CLEAR_MASK: u8 = !0x18;
    pub const WILL_QOS_MASK: u8 = 0x03;
    pub const WILL_QOS_SHIFT: u8 = 3;
}

/// PUBLISH flags layout
pub mod publish_flags {
    pub const QOS_CLEAR_MASK: u8 = !0x06;
    pub const QOS_MASK: u8 = 0x03;
    pub const QOS_SHIFT: u8 = 1;
}

/// String, binary and packet size limits
pub mod limits {
    pub const MAX_STRING_LENGTH: u16 = u16::MAX;
    pub const MAX_BINARY_LENGTH: usize = u16::MAX as usize;
    /// Largest Remaining Length plus the largest fixed header
    pub const MAX_PACKET_SIZE: u32 = 268_435_460;
    pub const MAX_PACKET_ID: u16 = u16::MAX;
}

/// Protocol name and levels written in CONNECT
pub mod protocol {
    pub const PROTOCOL_NAME: &str = "MQTT";
    pub const LEVEL_V311: u8 = 4;
    pub const LEVEL_V5: u8 = 5;
}

/// Defaults that apply when the peer does not advertise a value
pub mod defaults {
    use std::time::Duration;

    pub const RECEIVE_MAXIMUM: u16 = u16::MAX;
    pub const KEEP_ALIVE: Duration = Duration::from_secs(60);
    pub const PING_INTERVAL_PERCENT: u8 = 75;
    pub const PINGRESP_TIMEOUT_PERCENT: u8 = 150;
    pub const READ_BUFFER_SIZE: usize = 4096;
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}
