use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut, Bytes};

/// Encodes binary data with a 2-byte length prefix
///
/// # Errors
///
/// Returns `MalformedPacket` if the data length exceeds 65,535 bytes
pub fn encode_binary<B: BufMut>(buf: &mut B, data: &[u8]) -> Result<()> {
    let len = u16::try_from(data.len()).map_err(|_| {
        MqttError::MalformedPacket(format!(
            "binary data length {} exceeds maximum {}",
            data.len(),
            crate::constants::limits::MAX_BINARY_LENGTH
        ))
    })?;

    buf.put_u16(len);
    buf.put_slice(data);
    Ok(())
}

/// Decodes binary data with a 2-byte length prefix
///
/// # Errors
///
/// Returns `Incomplete` if the buffer holds fewer bytes than declared
pub fn decode_binary<B: Buf>(buf: &mut B) -> Result<Bytes> {
    let len = usize::from(super::decode_u16(buf)?);

    if buf.remaining() < len {
        return Err(MqttError::Incomplete {
            needed: len - buf.remaining(),
        });
    }

    Ok(buf.copy_to_bytes(len))
}

/// Encoded length of binary data (2 bytes for length + data bytes)
#[must_use]
pub fn binary_len(data: &[u8]) -> usize {
    2 + data.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_encode_decode_binary() {
        let mut buf = BytesMut::new();
        for data in [&b""[..], &[0x00, 0xFF, 0x10][..], &[0xAB; 300][..]] {
            buf.clear();
            encode_binary(&mut buf, data).unwrap();
            assert_eq!(buf.len(), binary_len(data));
            assert_eq!(&decode_binary(&mut buf).unwrap()[..], data);
        }
    }

    #[test]
    fn test_binary_too_long() {
        let mut buf = BytesMut::new();
        assert!(encode_binary(&mut buf, &vec![0u8; 65_536]).is_err());
    }

    #[test]
    fn test_decode_short_binary() {
        let mut buf = BytesMut::new();
        buf.put_u16(4);
        buf.put_slice(&[1, 2]);
        assert_eq!(
            decode_binary(&mut buf),
            Err(MqttError::Incomplete { needed: 2 })
        );
    }
}
