//! A transparent, forwarding MQTT proxy: a TCP listener pairs each
//! incoming client with an upstream broker connection and bridges the
//! two, decoding only as much of the traffic as a routing [`Policy`] asks
//! for.

pub mod bridge;
pub mod codec;
pub mod config;
pub mod consts;
pub mod error;
pub mod streamer;

pub use bridge::{Bridge, BridgeOutcome, BridgeStats, Decision, HandlerAction, Policy, Side};
pub use codec::{DecodeOptions, Packet, PacketHeader, PacketType, ProtocolLevel, QosLevel};
pub use config::{ConfigError, ProxyConfig, ProxyConfigBuilder};
pub use error::MqttError;
pub use streamer::Streamer;
