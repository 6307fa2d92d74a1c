//! Shared body layout for PUBACK, PUBREC, PUBREL and PUBCOMP

use crate::encoding::decode_u16;
use crate::error::{MqttError, Result};
use crate::packet::{FixedHeader, PacketType};
use crate::protocol::v5::properties::{Properties, PropertyContext};
use crate::protocol::v5::reason_codes::ReasonCode;
use crate::protocol::ProtocolVersion;
use bebytes::BeBytes;
use bytes::{Buf, BufMut};

/// Packet identifier followed by a reason code, the common v5 ack prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, BeBytes)]
pub struct AckPacketHeader {
    #[bebytes(big_endian)]
    pub packet_id: u16,
    pub reason_code: u8,
}

impl AckPacketHeader {
    #[must_use]
    pub fn create(packet_id: u16, reason_code: ReasonCode) -> Self {
        Self {
            packet_id,
            reason_code: u8::from(reason_code),
        }
    }
}

/// Decoded ack body
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AckBody {
    pub packet_id: u16,
    pub reason_code: ReasonCode,
    pub properties: Properties,
}

pub(crate) fn encode_ack<B: BufMut>(
    buf: &mut B,
    packet_type: PacketType,
    packet_id: u16,
    reason_code: ReasonCode,
    properties: &Properties,
    version: ProtocolVersion,
) -> Result<()> {
    if packet_id == 0 {
        return Err(MqttError::MalformedPacket(format!(
            "{packet_type:?} requires a non-zero packet identifier"
        )));
    }

    if !version.is_v5() {
        if reason_code != ReasonCode::Success || !properties.is_empty() {
            return Err(MqttError::UnsupportedImplementation(format!(
                "{packet_type:?} reason codes and properties require MQTT 5"
            )));
        }
        buf.put_u16(packet_id);
        return Ok(());
    }

    // Short form: the reason byte is omitted for Success without properties
    if reason_code == ReasonCode::Success && properties.is_empty() {
        buf.put_u16(packet_id);
        return Ok(());
    }

    let header = AckPacketHeader::create(packet_id, reason_code);
    buf.put_slice(&header.to_be_bytes());

    if !properties.is_empty() {
        properties.encode(buf)?;
    }
    Ok(())
}

pub(crate) fn decode_ack<B: Buf>(
    buf: &mut B,
    fixed_header: &FixedHeader,
    version: ProtocolVersion,
) -> Result<AckBody> {
    let packet_type = fixed_header.packet_type;

    let (packet_id, reason_code) = if version.is_v5() && fixed_header.remaining_length >= 3 {
        let mut header_bytes = [0u8; 3];
        if buf.remaining() < header_bytes.len() {
            return Err(MqttError::Incomplete {
                needed: header_bytes.len() - buf.remaining(),
            });
        }
        buf.copy_to_slice(&mut header_bytes);
        let (header, _) = AckPacketHeader::try_from_be_bytes(&header_bytes).map_err(|e| {
            MqttError::MalformedPacket(format!("invalid {packet_type:?} header: {e:?}"))
        })?;
        (
            header.packet_id,
            ReasonCode::decode_for(packet_type, header.reason_code)?,
        )
    } else {
        (decode_u16(buf)?, ReasonCode::Success)
    };

    if packet_id == 0 {
        return Err(MqttError::MalformedPacket(format!(
            "{packet_type:?} with packet identifier 0"
        )));
    }

    let properties = if version.is_v5() && fixed_header.remaining_length > 3 {
        let properties = Properties::decode(buf)?;
        properties.validate_for(PropertyContext::Packet(packet_type))?;
        properties
    } else {
        Properties::default()
    };

    tracing::trace!(?packet_type, packet_id, ?reason_code, "decoded ack");

    Ok(AckBody {
        packet_id,
        reason_code,
        properties,
    })
}
