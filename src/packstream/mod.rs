//! PackStream, the binary value format carried inside Bolt messages.
//!
//! All multi-byte quantities are big-endian. Sized types (strings, bytes,
//! lists, dictionaries) share one header scheme, see [`marker::SizedMarker`].

pub mod decode;
pub mod encode;
pub mod marker;

pub use decode::decode_value;
pub use encode::encode_value;
