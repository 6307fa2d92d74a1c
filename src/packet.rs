pub mod ack;
pub mod auth;
pub mod connack;
pub mod connect;
pub mod disconnect;
pub mod pingreq;
pub mod pingresp;
pub mod puback;
pub mod pubcomp;
pub mod publish;
pub mod pubrec;
pub mod pubrel;
pub mod suback;
pub mod subscribe;
pub mod unsuback;
pub mod unsubscribe;


use crate::encoding::{decode_variable_int, encode_variable_int, VariableInt};
use crate::error::{MqttError, Result};
use crate::protocol::ProtocolVersion;
use bebytes::BeBytes;
use bytes::{Buf, BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BeBytes)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
    Auth = 15,
}

impl PacketType {
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        // TryFrom generated by BeBytes
        Self::try_from(value).ok()
    }
}

impl From<PacketType> for u8 {
    fn from(packet_type: PacketType) -> Self {
        packet_type as u8
    }
}

/// MQTT packet fixed header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: u32,
}

impl FixedHeader {
    #[must_use]
    pub fn new(packet_type: PacketType, flags: u8, remaining_length: u32) -> Self {
        Self {
            packet_type,
            flags,
            remaining_length,
        }
    }

    /// # Errors
    ///
    /// Returns `MalformedPacket` if the remaining length exceeds the
    /// variable byte integer range
    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let byte1 =
            (u8::from(self.packet_type) << 4) | (self.flags & crate::constants::masks::FLAGS);
        buf.put_u8(byte1);
        encode_variable_int(buf, self.remaining_length)
    }

    /// Decodes a fixed header from the buffer
    ///
    /// # Errors
    ///
    /// - `Incomplete` if the buffer ends inside the header
    /// - `MalformedPacket` for packet type 0 or an over-long remaining length
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let byte1 = crate::encoding::decode_u8(buf)?;
        let packet_type_val = (byte1 & crate::constants::masks::PACKET_TYPE) >> 4;
        let flags = byte1 & crate::constants::masks::FLAGS;

        let packet_type = PacketType::from_u8(packet_type_val).ok_or_else(|| {
            MqttError::MalformedPacket(format!("reserved packet type {packet_type_val}"))
        })?;

        let remaining_length = decode_variable_int(buf)?;

        Ok(Self {
            packet_type,
            flags,
            remaining_length,
        })
    }

    /// Checks the fixed flags nibble for the packet type
    ///
    /// # Errors
    ///
    /// Returns `MalformedPacket` if reserved flag bits do not match
    pub fn validate_flags(&self) -> Result<()> {
        let valid = match self.packet_type {
            PacketType::Publish => {
                let qos = crate::flags::PublishFlags::extract_qos(self.flags);
                let dup = self.flags & crate::flags::PublishFlags::Dup as u8 != 0;
                qos != 3 && !(qos == 0 && dup)
            }
            PacketType::PubRel | PacketType::Subscribe | PacketType::Unsubscribe => {
                self.flags == 0x02
            }
            _ => self.flags == 0,
        };

        if valid {
            Ok(())
        } else {
            Err(MqttError::MalformedPacket(format!(
                "invalid flags 0x{:X} for {:?}",
                self.flags, self.packet_type
            )))
        }
    }

    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + crate::encoding::variable_int_len(self.remaining_length)
    }
}

/// A control packet
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect(Box<connect::ConnectPacket>),
    ConnAck(connack::ConnAckPacket),
    Publish(publish::PublishPacket),
    PubAck(puback::PubAckPacket),
    PubRec(pubrec::PubRecPacket),
    PubRel(pubrel::PubRelPacket),
    PubComp(pubcomp::PubCompPacket),
    Subscribe(subscribe::SubscribePacket),
    SubAck(suback::SubAckPacket),
    Unsubscribe(unsubscribe::UnsubscribePacket),
    UnsubAck(unsuback::UnsubAckPacket),
    PingReq,
    PingResp,
    Disconnect(disconnect::DisconnectPacket),
    Auth(auth::AuthPacket),
}

impl Packet {
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::PubRec(_) => PacketType::PubRec,
            Packet::PubRel(_) => PacketType::PubRel,
            Packet::PubComp(_) => PacketType::PubComp,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect(_) => PacketType::Disconnect,
            Packet::Auth(_) => PacketType::Auth,
        }
    }

    /// Encodes the complete packet, fixed header included
    ///
    /// # Errors
    ///
    /// Returns an error if a field cannot be represented on the wire or in
    /// the given protocol version
    pub fn encode<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        match self {
            Packet::Connect(p) => p.encode(buf, version),
            Packet::ConnAck(p) => p.encode(buf, version),
            Packet::Publish(p) => p.encode(buf, version),
            Packet::PubAck(p) => p.encode(buf, version),
            Packet::PubRec(p) => p.encode(buf, version),
            Packet::PubRel(p) => p.encode(buf, version),
            Packet::PubComp(p) => p.encode(buf, version),
            Packet::Subscribe(p) => p.encode(buf, version),
            Packet::SubAck(p) => p.encode(buf, version),
            Packet::Unsubscribe(p) => p.encode(buf, version),
            Packet::UnsubAck(p) => p.encode(buf, version),
            Packet::PingReq => pingreq::PingReqPacket.encode(buf, version),
            Packet::PingResp => pingresp::PingRespPacket.encode(buf, version),
            Packet::Disconnect(p) => p.encode(buf, version),
            Packet::Auth(p) => p.encode(buf, version),
        }
    }

    /// Encodes into a freshly allocated buffer
    ///
    /// # Errors
    ///
    /// See [`Packet::encode`]
    pub fn to_bytes(&self, version: ProtocolVersion) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf, version)?;
        Ok(buf.freeze())
    }

    /// Decodes a packet body that spans exactly `fixed_header.remaining_length` bytes
    ///
    /// Bytes after the body are left in `buf`.
    ///
    /// # Errors
    ///
    /// - `Incomplete` if `buf` holds fewer than `remaining_length` bytes
    /// - `MalformedPacket` for bad flags, or a body that does not parse to
    ///   exactly its declared length
    /// - `ProtocolError` for structurally valid bodies that break a protocol rule
    pub fn decode_from_body<B: Buf>(
        fixed_header: &FixedHeader,
        buf: &mut B,
        version: ProtocolVersion,
    ) -> Result<Self> {
        fixed_header.validate_flags()?;

        if fixed_header.packet_type == PacketType::Auth && version == ProtocolVersion::V311 {
            return Err(MqttError::MalformedPacket(
                "AUTH is reserved in MQTT 3.1.1".to_string(),
            ));
        }

        let body_len = fixed_header.remaining_length as usize;
        if buf.remaining() < body_len {
            return Err(MqttError::Incomplete {
                needed: body_len - buf.remaining(),
            });
        }

        let mut body = buf.take(body_len);
        let packet = Self::decode_variant(fixed_header, &mut body, version)
            .map_err(MqttError::into_malformed)?;

        if body.has_remaining() {
            return Err(MqttError::MalformedPacket(format!(
                "{} unread byte(s) in {:?} body",
                body.remaining(),
                fixed_header.packet_type
            )));
        }

        tracing::trace!(packet_type = ?fixed_header.packet_type, remaining_length = fixed_header.remaining_length, "decoded packet");
        Ok(packet)
    }

    fn decode_variant<B: Buf>(
        fixed_header: &FixedHeader,
        buf: &mut B,
        version: ProtocolVersion,
    ) -> Result<Self> {
        Ok(match fixed_header.packet_type {
            PacketType::Connect => Packet::Connect(Box::new(
                connect::ConnectPacket::decode_body(buf, fixed_header, version)?,
            )),
            PacketType::ConnAck => {
                Packet::ConnAck(connack::ConnAckPacket::decode_body(buf, fixed_header, version)?)
            }
            PacketType::Publish => {
                Packet::Publish(publish::PublishPacket::decode_body(buf, fixed_header, version)?)
            }
            PacketType::PubAck => {
                Packet::PubAck(puback::PubAckPacket::decode_body(buf, fixed_header, version)?)
            }
            PacketType::PubRec => {
                Packet::PubRec(pubrec::PubRecPacket::decode_body(buf, fixed_header, version)?)
            }
            PacketType::PubRel => {
                Packet::PubRel(pubrel::PubRelPacket::decode_body(buf, fixed_header, version)?)
            }
            PacketType::PubComp => {
                Packet::PubComp(pubcomp::PubCompPacket::decode_body(buf, fixed_header, version)?)
            }
            PacketType::Subscribe => Packet::Subscribe(subscribe::SubscribePacket::decode_body(
                buf,
                fixed_header,
                version,
            )?),
            PacketType::SubAck => {
                Packet::SubAck(suback::SubAckPacket::decode_body(buf, fixed_header, version)?)
            }
            PacketType::Unsubscribe => Packet::Unsubscribe(
                unsubscribe::UnsubscribePacket::decode_body(buf, fixed_header, version)?,
            ),
            PacketType::UnsubAck => Packet::UnsubAck(unsuback::UnsubAckPacket::decode_body(
                buf,
                fixed_header,
                version,
            )?),
            PacketType::PingReq => {
                pingreq::PingReqPacket::decode_body(buf, fixed_header, version)?;
                Packet::PingReq
            }
            PacketType::PingResp => {
                pingresp::PingRespPacket::decode_body(buf, fixed_header, version)?;
                Packet::PingResp
            }
            PacketType::Disconnect => Packet::Disconnect(
                disconnect::DisconnectPacket::decode_body(buf, fixed_header, version)?,
            ),
            PacketType::Auth => {
                Packet::Auth(auth::AuthPacket::decode_body(buf, fixed_header, version)?)
            }
        })
    }
}

/// Trait for MQTT packets
///
/// Encoding and decoding are pure: the same packet value and protocol version
/// always produce the same bytes.
pub trait MqttPacket: Sized {
    fn packet_type(&self) -> PacketType;

    /// Fixed header flags nibble
    fn flags(&self) -> u8 {
        0
    }

    /// Encodes the variable header and payload
    ///
    /// # Errors
    ///
    /// Returns an error if a field cannot be represented on the wire
    fn encode_body<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()>;

    /// Decodes the variable header and payload
    ///
    /// # Errors
    ///
    /// Returns an error if the body violates the encoding or protocol rules
    fn decode_body<B: Buf>(
        buf: &mut B,
        fixed_header: &FixedHeader,
        version: ProtocolVersion,
    ) -> Result<Self>;

    /// Encodes the complete packet
    ///
    /// The body is serialized into a scratch buffer first so that the
    /// Remaining Length is exact.
    ///
    /// # Errors
    ///
    /// Returns an error if the body cannot be encoded or is too large
    fn encode<B: BufMut>(&self, buf: &mut B, version: ProtocolVersion) -> Result<()> {
        let mut body = Vec::new();
        self.encode_body(&mut body, version)?;

        let remaining_length = VariableInt::try_from(body.len())?;
        let fixed_header =
            FixedHeader::new(self.packet_type(), self.flags(), remaining_length.value());

        fixed_header.encode(buf)?;
        buf.put_slice(&body);
        Ok(())
    }
}
