//! Primitive MQTT wire types
//!
//! Decoders report a short buffer as [`MqttError::Incomplete`](crate::MqttError::Incomplete)
//! so that a streaming caller can buffer and retry; encoding rule violations are
//! [`MqttError::MalformedPacket`](crate::MqttError::MalformedPacket).

pub mod binary;
pub mod integer;
pub mod string;
pub mod variable_int;

pub use binary::{binary_len, decode_binary, encode_binary};
pub use integer::{decode_u16, decode_u32, decode_u8};
pub use string::{decode_string, decode_string_pair, encode_string, string_len};
pub use variable_int::{
    decode_variable_int, encode_variable_int, variable_int_len, VariableInt, VARIABLE_INT_MAX,
};
