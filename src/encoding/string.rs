use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut};

/// Encodes a UTF-8 string with a 2-byte length prefix
///
/// # MQTT String Format:
/// - 2 bytes: string length (big-endian)
/// - N bytes: UTF-8 encoded string data
///
/// # Errors
///
/// Returns `MalformedPacket` if:
/// - The string contains null characters
/// - The string length exceeds 65,535 bytes
pub fn encode_string<B: BufMut>(buf: &mut B, string: &str) -> Result<()> {
    if string.contains('\0') {
        return Err(MqttError::MalformedPacket(
            "string contains null character".to_string(),
        ));
    }

    let len = u16::try_from(string.len()).map_err(|_| {
        MqttError::MalformedPacket(format!(
            "string length {} exceeds maximum {}",
            string.len(),
            crate::constants::limits::MAX_STRING_LENGTH
        ))
    })?;

    buf.put_u16(len);
    buf.put_slice(string.as_bytes());
    Ok(())
}

/// Decodes a UTF-8 string with a 2-byte length prefix
///
/// # Errors
///
/// - `Incomplete` if the buffer holds fewer bytes than the declared length
/// - `MalformedPacket` if the data is not valid UTF-8 or contains U+0000
pub fn decode_string<B: Buf>(buf: &mut B) -> Result<String> {
    let len = usize::from(super::decode_u16(buf)?);

    if buf.remaining() < len {
        return Err(MqttError::Incomplete {
            needed: len - buf.remaining(),
        });
    }

    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);

    let string = String::from_utf8(bytes)
        .map_err(|e| MqttError::MalformedPacket(format!("invalid UTF-8: {e}")))?;

    if string.contains('\0') {
        return Err(MqttError::MalformedPacket(
            "string contains null character".to_string(),
        ));
    }

    Ok(string)
}

/// Decodes a UTF-8 String Pair (user property key and value)
///
/// # Errors
///
/// See [`decode_string`]
pub fn decode_string_pair<B: Buf>(buf: &mut B) -> Result<(String, String)> {
    let key = decode_string(buf)?;
    let value = decode_string(buf)?;
    Ok((key, value))
}

/// Encoded length of a string (2 bytes for length + string bytes)
#[must_use]
pub fn string_len(string: &str) -> usize {
    2 + string.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_encode_decode_string() {
        let mut buf = BytesMut::new();
        let long_string = "a".repeat(1000);

        for test_str in ["", "hello", "MQTT", "Hello, 世界!", long_string.as_str()] {
            buf.clear();
            encode_string(&mut buf, test_str).unwrap();
            assert_eq!(buf.len(), string_len(test_str));
            assert_eq!(decode_string(&mut buf).unwrap(), test_str);
        }
    }

    #[test]
    fn test_null_character_rejected_both_ways() {
        let mut buf = BytesMut::new();
        assert!(encode_string(&mut buf, "hello\0world").is_err());

        buf.put_u16(11);
        buf.put_slice(b"hello\0world");
        assert!(matches!(
            decode_string(&mut buf),
            Err(MqttError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_encode_string_too_long() {
        let mut buf = BytesMut::new();
        let long_string = "a".repeat(usize::from(u16::MAX) + 1);
        assert!(encode_string(&mut buf, &long_string).is_err());
    }

    #[test]
    fn test_short_buffer_is_incomplete_not_malformed() {
        let mut buf = BytesMut::new();
        buf.put_u8(0);
        assert!(matches!(
            decode_string(&mut buf),
            Err(MqttError::Incomplete { .. })
        ));

        let mut buf = BytesMut::new();
        buf.put_u16(10);
        buf.put_slice(b"hello");
        assert_eq!(
            decode_string(&mut buf),
            Err(MqttError::Incomplete { needed: 5 })
        );
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let mut buf = BytesMut::new();
        buf.put_u16(3);
        buf.put_slice(&[0xFF, 0xFE, 0xFD]);
        assert!(matches!(
            decode_string(&mut buf),
            Err(MqttError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_string_pair() {
        let mut buf = BytesMut::new();
        encode_string(&mut buf, "region").unwrap();
        encode_string(&mut buf, "eu-west").unwrap();
        let (k, v) = decode_string_pair(&mut buf).unwrap();
        assert_eq!((k.as_str(), v.as_str()), ("region", "eu-west"));
    }
}
