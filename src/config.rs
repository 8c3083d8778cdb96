//! Proxy configuration and its builder.

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("listen address is required")]
    MissingListenAddr,
    #[error("upstream address is required")]
    MissingUpstreamAddr,
    #[error("invalid socket address `{0}`: {1}")]
    InvalidAddr(String, std::net::AddrParseError),
}

/// Runtime configuration for a single proxy listener.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    listen_addr: SocketAddr,
    upstream_addr: SocketAddr,
    strict_flags: bool,
    validate_connect_reserved_bit: bool,
    max_packet_len: u32,
}

impl ProxyConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn upstream_addr(&self) -> SocketAddr {
        self.upstream_addr
    }

    pub fn strict_flags(&self) -> bool {
        self.strict_flags
    }

    pub fn validate_connect_reserved_bit(&self) -> bool {
        self.validate_connect_reserved_bit
    }

    pub fn max_packet_len(&self) -> u32 {
        self.max_packet_len
    }

    pub fn decode_options(&self) -> crate::codec::DecodeOptions {
        crate::codec::DecodeOptions {
            strict_flags: self.strict_flags,
            validate_connect_reserved_bit: self.validate_connect_reserved_bit,
        }
    }
}

/// Fluent builder for [`ProxyConfig`]. `listen_addr` and `upstream_addr`
/// are the only required fields; everything else defaults to the
/// permissive behaviour described in DESIGN.md's Open Question
/// resolutions.
#[derive(Debug, Default)]
pub struct ProxyConfigBuilder {
    listen_addr: Option<SocketAddr>,
    upstream_addr: Option<SocketAddr>,
    strict_flags: bool,
    validate_connect_reserved_bit: bool,
    max_packet_len: Option<u32>,
}

impl ProxyConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = Some(addr);
        self
    }

    pub fn set_upstream_addr(mut self, addr: SocketAddr) -> Self {
        self.upstream_addr = Some(addr);
        self
    }

    pub fn set_strict_flags(mut self, strict: bool) -> Self {
        self.strict_flags = strict;
        self
    }

    pub fn set_validate_connect_reserved_bit(mut self, validate: bool) -> Self {
        self.validate_connect_reserved_bit = validate;
        self
    }

    pub fn set_max_packet_len(mut self, max: u32) -> Self {
        self.max_packet_len = Some(max);
        self
    }

    pub fn build(self) -> Result<ProxyConfig, ConfigError> {
        Ok(ProxyConfig {
            listen_addr: self.listen_addr.ok_or(ConfigError::MissingListenAddr)?,
            upstream_addr: self.upstream_addr.ok_or(ConfigError::MissingUpstreamAddr)?,
            strict_flags: self.strict_flags,
            validate_connect_reserved_bit: self.validate_connect_reserved_bit,
            max_packet_len: self
                .max_packet_len
                .unwrap_or(crate::consts::MAX_REMAINING_LENGTH),
        })
    }
}
