use thiserror::Error;

/// Error taxonomy surfaced by the codec, streamer and bridge.
///
/// Propagation is one-shot: nothing in this crate retries internally. A
/// [`crate::streamer::Streamer`] latches the first error it sees and becomes
/// terminal; a [`crate::bridge::Bridge`] propagates the first error from
/// either worker and tears the whole connection down.
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed variable-byte integer")]
    MalformedVarint,

    #[error("malformed packet: {0}")]
    MalformedPacket(&'static str),

    #[error("unsupported protocol name `{0}`")]
    UnsupportedProtocol(String),

    #[error("unknown packet type {0}")]
    UnknownPacketType(u8),

    #[error("encoded body of {0} bytes exceeds the 268435455 byte limit")]
    PacketTooLarge(usize),

    #[error("streamer used out of phase: {0}")]
    IllegalState(&'static str),

    #[error("invalid utf-8 string field")]
    Utf8Error(#[from] std::string::FromUtf8Error),
}
