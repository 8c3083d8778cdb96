//! The MQTT wire codec: binary primitives, the packet model, and the
//! decoder/encoder pair built on top of them.
//!
//! Framing (turning a byte stream into `(header, body)` pairs) lives in
//! [`crate::streamer`], not here, because the fixed header's remaining-length
//! field is a variable-byte integer and reading it requires suspending on
//! the transport one byte at a time. Everything in this module is purely
//! synchronous: given a header and exactly `header.length()` bytes, decoding
//! and encoding never block.

pub mod binary;
pub mod decode;
pub mod encode;
pub mod packet;

pub use packet::{DecodeOptions, Packet, PacketHeader, PacketType, ProtocolLevel, QosLevel};
