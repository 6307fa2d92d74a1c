//! Variable Byte Integer as defined by MQTT
//!
//! Values use 1-4 bytes of base-128 groups, least significant group first, with
//! the continuation bit set on every byte but the last:
//! - 0-127: 1 byte
//! - 128-16,383: 2 bytes
//! - 16,384-2,097,151: 3 bytes
//! - 2,097,152-268,435,455: 4 bytes

use crate::constants::masks::{CONTINUATION_BIT, VARIABLE_BYTE_VALUE};
use crate::error::{MqttError, Result};
use bytes::{Buf, BufMut};
use std::fmt;

/// Maximum value that can be encoded as a variable byte integer (268,435,455)
pub const VARIABLE_INT_MAX: u32 = 268_435_455;

const MAX_ENCODED_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariableInt {
    value: u32,
}

impl VariableInt {
    /// Creates a new `VariableInt` from a u32 value
    ///
    /// # Errors
    ///
    /// Returns `MqttError::MalformedPacket` if the value exceeds the maximum
    pub fn new(value: u32) -> Result<Self> {
        if value > VARIABLE_INT_MAX {
            return Err(MqttError::MalformedPacket(format!(
                "variable byte integer {value} exceeds maximum {VARIABLE_INT_MAX}"
            )));
        }
        Ok(Self { value })
    }

    #[must_use]
    pub fn value(&self) -> u32 {
        self.value
    }

    #[must_use]
    pub fn encoded_size(&self) -> usize {
        match self.value {
            0..=127 => 1,
            128..=16_383 => 2,
            16_384..=2_097_151 => 3,
            _ => 4,
        }
    }

    /// Encodes this variable integer into the provided buffer
    pub fn encode<B: BufMut>(&self, buf: &mut B) {
        let mut val = self.value;
        loop {
            // truncation intended: the low 7 bits
            #[allow(clippy::cast_possible_truncation)]
            let mut byte = (val & u32::from(VARIABLE_BYTE_VALUE)) as u8;
            val >>= 7;
            if val > 0 {
                byte |= CONTINUATION_BIT;
            }
            buf.put_u8(byte);
            if val == 0 {
                break;
            }
        }
    }

    /// Decodes a variable integer from the buffer
    ///
    /// # Errors
    ///
    /// - `Incomplete` if the buffer ends while the continuation bit is still set
    /// - `MalformedPacket` if the fourth byte still has its continuation bit set
    pub fn decode<B: Buf>(buf: &mut B) -> Result<Self> {
        let mut value = 0u32;

        for index in 0..MAX_ENCODED_LEN {
            if !buf.has_remaining() {
                return Err(MqttError::Incomplete { needed: 1 });
            }
            let byte = buf.get_u8();
            value |= u32::from(byte & VARIABLE_BYTE_VALUE) << (7 * index);

            if byte & CONTINUATION_BIT == 0 {
                return Ok(Self { value });
            }
        }

        Err(MqttError::MalformedPacket(
            "variable byte integer continues past 4 bytes".to_string(),
        ))
    }

    /// Decodes from the front of a slice without consuming it
    ///
    /// Returns the value and the number of bytes it occupies, or `None` when
    /// the slice ends before the integer does.
    ///
    /// # Errors
    ///
    /// Returns `MalformedPacket` if the integer is longer than 4 bytes
    pub fn peek(bytes: &[u8]) -> Result<Option<(Self, usize)>> {
        let mut cursor = bytes;
        match Self::decode(&mut cursor) {
            Ok(var_int) => Ok(Some((var_int, bytes.len() - cursor.len()))),
            Err(MqttError::Incomplete { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl fmt::Display for VariableInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl From<VariableInt> for u32 {
    fn from(v: VariableInt) -> Self {
        v.value
    }
}

impl TryFrom<usize> for VariableInt {
    type Error = MqttError;

    fn try_from(value: usize) -> Result<Self> {
        let value = u32::try_from(value).map_err(|_| {
            MqttError::MalformedPacket(format!("{value} does not fit a variable byte integer"))
        })?;
        Self::new(value)
    }
}

/// Encodes a u32 value as a variable byte integer
///
/// # Errors
///
/// Returns `MqttError::MalformedPacket` if the value exceeds the maximum
pub fn encode_variable_int<B: BufMut>(buf: &mut B, value: u32) -> Result<()> {
    VariableInt::new(value)?.encode(buf);
    Ok(())
}

/// Decodes a variable byte integer from the buffer
///
/// # Errors
///
/// See [`VariableInt::decode`]
pub fn decode_variable_int<B: Buf>(buf: &mut B) -> Result<u32> {
    Ok(VariableInt::decode(buf)?.value())
}

/// Number of bytes needed to encode `value`, saturating at 4
#[must_use]
pub fn variable_int_len(value: u32) -> usize {
    VariableInt {
        value: value.min(VARIABLE_INT_MAX),
    }
    .encoded_size()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_new_valid_and_invalid_values() {
        assert!(VariableInt::new(0).is_ok());
        assert!(VariableInt::new(VARIABLE_INT_MAX).is_ok());
        assert!(VariableInt::new(VARIABLE_INT_MAX + 1).is_err());
        assert!(VariableInt::new(u32::MAX).is_err());
    }

    #[test]
    fn test_width_boundaries() {
        for (value, width) in [
            (0, 1),
            (127, 1),
            (128, 2),
            (16_383, 2),
            (16_384, 3),
            (2_097_151, 3),
            (2_097_152, 4),
            (VARIABLE_INT_MAX, 4),
        ] {
            let mut buf = BytesMut::new();
            encode_variable_int(&mut buf, value).unwrap();
            assert_eq!(buf.len(), width, "width of {value}");
            assert_eq!(variable_int_len(value), width);
            assert_eq!(decode_variable_int(&mut buf).unwrap(), value);
        }
    }

    #[test]
    fn test_mqtt_spec_examples() {
        let mut buf = BytesMut::new();
        encode_variable_int(&mut buf, 64).unwrap();
        assert_eq!(&buf[..], &[0x40]);

        buf.clear();
        encode_variable_int(&mut buf, 321).unwrap();
        assert_eq!(&buf[..], &[0xC1, 0x02]);

        buf.clear();
        encode_variable_int(&mut buf, VARIABLE_INT_MAX).unwrap();
        assert_eq!(&buf[..], &[0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn test_decode_needs_more_bytes() {
        let mut buf: &[u8] = &[0x80];
        assert_eq!(
            VariableInt::decode(&mut buf),
            Err(MqttError::Incomplete { needed: 1 })
        );
        assert_eq!(VariableInt::peek(&[0xFF, 0xFF]).unwrap(), None);
    }

    #[test]
    fn test_decode_fifth_continuation_byte_is_malformed() {
        let mut buf: &[u8] = &[0x80, 0x80, 0x80, 0x80, 0x01];
        assert!(matches!(
            VariableInt::decode(&mut buf),
            Err(MqttError::MalformedPacket(_))
        ));
        // detected without waiting for the fifth byte
        assert!(VariableInt::peek(&[0xFF, 0xFF, 0xFF, 0xFF]).is_err());
    }

    #[test]
    fn test_peek_does_not_consume() {
        let bytes = [0xC1, 0x02, 0xAA];
        let (value, len) = VariableInt::peek(&bytes).unwrap().unwrap();
        assert_eq!(value.value(), 321);
        assert_eq!(len, 2);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_round_trip(value in 0u32..=VARIABLE_INT_MAX) {
                let mut buf = BytesMut::new();
                encode_variable_int(&mut buf, value).unwrap();
                prop_assert_eq!(buf.len(), variable_int_len(value));
                prop_assert_eq!(decode_variable_int(&mut buf).unwrap(), value);
            }

            #[test]
            fn prop_invalid_values_rejected(value in (VARIABLE_INT_MAX + 1)..=u32::MAX) {
                prop_assert!(VariableInt::new(value).is_err());
            }

            #[test]
            fn prop_every_proper_prefix_is_incomplete(value in 128u32..=VARIABLE_INT_MAX) {
                let mut buf = BytesMut::new();
                encode_variable_int(&mut buf, value).unwrap();
                for cut in 1..buf.len() {
                    prop_assert_eq!(VariableInt::peek(&buf[..cut]).unwrap(), None);
                }
            }
        }
    }
}
