//! Error taxonomy (spec §7): one enum per failure domain, not one flat enum.
//!
//! `RateLimitDrop` is deliberately absent here — per spec §7 it is a policy
//! outcome, not an error, and lives as a variant of `pipeline::Outcome`.

use thiserror::Error;

use crate::types::MacAddress;

/// Wire-codec failures. Always recovered locally: the offending packet is
/// dropped and a statistics record with `method = None` is emitted.
#[derive(Debug, Error)]
pub enum PacketError {
    #[error("packet shorter than the 240-byte fixed header ({0} bytes)")]
    PacketTooShort(usize),
    #[error("magic cookie mismatch")]
    BadMagic,
    #[error("option {0} truncated before its declared length")]
    TruncatedOption(u8),
    #[error("option {code} has length {got}, expected {expected}")]
    InvalidOptionLength {
        code: u8,
        got: usize,
        expected: &'static str,
    },
    #[error("unknown hardware type {0}")]
    UnknownHardwareType(u8),
    #[error("hardware address length {0} exceeds the 16-byte chaddr field")]
    InvalidHardwareLength(u8),
    #[error("invalid UTF-8 in option {0}")]
    InvalidUtf8(u8),
    #[error("buffer overflow while encoding")]
    BufferOverflow,
}

/// Directory backend failures (spec §4.D / §7). Logged with a per-kind
/// cooldown so one broken client or backend does not flood alerts.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("backend lookup failed for {mac}: {message}")]
    Backend { mac: MacAddress, message: String },
    #[error("directory returned {count} definitions for {mac} and none matched giaddr {giaddr}")]
    AmbiguousDefinitions {
        mac: MacAddress,
        count: usize,
        giaddr: crate::types::Ipv4Address,
    },
}

/// `load_dhcp_packet` / `handle_unknown_mac` hook failures. Treated uniformly
/// as "drop the packet"; the cause is logged.
#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook {hook} failed: {message}")]
    Failed { hook: &'static str, message: String },
}

/// Fatal at startup only.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration key {0}")]
    MissingKey(&'static str),
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// Socket-layer failures. On receive, retried after a brief sleep; on
/// exhaustion the server clears its `alive` flag (spec §7).
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("recv failed: {0}")]
    Recv(#[source] std::io::Error),
    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),
}

/// A reinit callback raised; escalates to orderly server shutdown.
#[derive(Debug, Error)]
#[error("reinitialisation callback failed: {message}")]
pub struct ReinitFailure {
    pub message: String,
}
