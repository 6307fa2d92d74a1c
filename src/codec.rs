//! Framing of control packets on a byte stream
//!
//! [`PacketCodec`] pulls whole packets out of a receive buffer that may hold
//! any fragment of the stream, and enforces packet size limits in both
//! directions.

use crate::encoding::VariableInt;
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, Packet, PacketType};
use crate::protocol::ProtocolVersion;
use bytes::{Bytes, BytesMut};
use tracing::{trace, warn};

/// Stateful packet framer for one network connection
#[derive(Debug, Clone)]
pub struct PacketCodec {
    version: ProtocolVersion,
    /// Largest packet we accept, as advertised in our CONNECT
    max_incoming_size: Option<u32>,
    /// Largest packet the peer accepts, as advertised in its CONNACK
    max_outgoing_size: Option<u32>,
}

impl PacketCodec {
    #[must_use]
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            max_incoming_size: None,
            max_outgoing_size: None,
        }
    }

    #[must_use]
    pub fn with_max_incoming_size(mut self, max: Option<u32>) -> Self {
        self.max_incoming_size = max;
        self
    }

    pub fn set_max_outgoing_size(&mut self, max: Option<u32>) {
        self.max_outgoing_size = max;
    }

    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    #[must_use]
    pub fn max_outgoing_size(&self) -> Option<u32> {
        self.max_outgoing_size
    }

    /// Takes one complete packet off the front of `src`
    ///
    /// Returns `Ok(None)` and leaves `src` untouched when it does not yet hold
    /// a whole packet. The size limit is checked as soon as the fixed header is
    /// available, before the body is buffered.
    ///
    /// # Errors
    ///
    /// - `MalformedPacket` for a reserved packet type, an over-long remaining
    ///   length, or a body that does not parse
    /// - `PacketTooLarge` if the packet exceeds the incoming size limit
    /// - `ProtocolError` for bodies that break a protocol rule
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Packet>> {
        let Some(&first) = src.first() else {
            return Ok(None);
        };

        if PacketType::from_u8(first >> 4).is_none() {
            return Err(MqttError::MalformedPacket(format!(
                "reserved packet type {}",
                first >> 4
            )));
        }

        let Some((remaining_length, length_len)) = VariableInt::peek(&src[1..])? else {
            return Ok(None);
        };

        let total = 1 + length_len + remaining_length.value() as usize;
        if let Some(max) = self.max_incoming_size {
            if total > max as usize {
                warn!(size = total, max, "incoming packet exceeds maximum packet size");
                return Err(MqttError::PacketTooLarge {
                    size: total,
                    max: max as usize,
                });
            }
        }

        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let frame = src.split_to(total).freeze();
        decode_packet(&frame, self.version).map(Some)
    }

    /// Appends the encoding of `packet` to `dst`
    ///
    /// # Errors
    ///
    /// - `PacketTooLarge` if the encoded packet exceeds the peer's maximum
    ///   packet size; `dst` is left as it was
    /// - any encoding error of the packet itself
    pub fn encode(&self, packet: &Packet, dst: &mut BytesMut) -> Result<()> {
        let start = dst.len();
        packet.encode(dst, self.version)?;
        let size = dst.len() - start;

        if let Some(max) = self.max_outgoing_size {
            if size > max as usize {
                dst.truncate(start);
                return Err(MqttError::PacketTooLarge {
                    size,
                    max: max as usize,
                });
            }
        }

        trace!(packet_type = ?packet.packet_type(), size, "encoded packet");
        Ok(())
    }
}

/// Encodes a single packet
///
/// # Errors
///
/// Returns any encoding error of the packet
pub fn encode_packet(packet: &Packet, version: ProtocolVersion) -> Result<Bytes> {
    packet.to_bytes(version)
}

/// Decodes exactly one complete packet
///
/// # Errors
///
/// - `Incomplete` if `bytes` ends before the packet does
/// - `MalformedPacket` if bytes remain after the packet, or for any decoding
///   failure of the packet itself
pub fn decode_packet(bytes: &[u8], version: ProtocolVersion) -> Result<Packet> {
    let mut buf = bytes;
    let fixed_header = FixedHeader::decode(&mut buf)?;
    let packet = Packet::decode_from_body(&fixed_header, &mut buf, version)?;

    if !buf.is_empty() {
        return Err(MqttError::MalformedPacket(format!(
            "{} byte(s) after the packet",
            buf.len()
        )));
    }
    Ok(packet)
}
