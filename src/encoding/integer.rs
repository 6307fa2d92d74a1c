use crate::error::{MqttError, Result};
use bytes::Buf;

fn ensure<B: Buf>(buf: &B, len: usize) -> Result<()> {
    if buf.remaining() < len {
        return Err(MqttError::Incomplete {
            needed: len - buf.remaining(),
        });
    }
    Ok(())
}

/// Reads a single byte
///
/// # Errors
///
/// Returns `Incomplete` if the buffer is empty
pub fn decode_u8<B: Buf>(buf: &mut B) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

/// Reads a big-endian Two Byte Integer
///
/// # Errors
///
/// Returns `Incomplete` if fewer than 2 bytes remain
pub fn decode_u16<B: Buf>(buf: &mut B) -> Result<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

/// Reads a big-endian Four Byte Integer
///
/// # Errors
///
/// Returns `Incomplete` if fewer than 4 bytes remain
pub fn decode_u32<B: Buf>(buf: &mut B) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_big_endian_integers() {
        let mut buf = Bytes::from_static(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07]);
        assert_eq!(decode_u8(&mut buf).unwrap(), 0x01);
        assert_eq!(decode_u16(&mut buf).unwrap(), 0x0203);
        assert_eq!(decode_u32(&mut buf).unwrap(), 0x0405_0607);
    }

    #[test]
    fn test_short_reads_need_more_bytes() {
        let mut buf = Bytes::from_static(&[0x01]);
        assert_eq!(
            decode_u16(&mut buf),
            Err(MqttError::Incomplete { needed: 1 })
        );
        // nothing consumed on failure
        assert_eq!(buf.len(), 1);

        let mut buf = Bytes::from_static(&[0x00, 0x00]);
        assert_eq!(
            decode_u32(&mut buf),
            Err(MqttError::Incomplete { needed: 2 })
        );

        let mut empty = Bytes::new();
        assert!(matches!(
            decode_u8(&mut empty),
            Err(MqttError::Incomplete { .. })
        ));
    }
}
