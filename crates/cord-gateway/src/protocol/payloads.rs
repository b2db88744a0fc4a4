//! Payload definitions
//!
//! The `d` field of the envelopes this client sends and understands.

use serde::{Deserialize, Serialize};

/// Payload for op 10 (Hello)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub compress: bool,
    /// Member count above which a guild is sent without offline members
    pub large_threshold: u32,
    /// `[shard_id, shard_count]`
    pub shard: [u32; 2],
    pub properties: IdentifyProperties,
}

impl IdentifyPayload {
    #[must_use]
    pub fn new(token: impl Into<String>, shard_id: u32, shard_count: u32) -> Self {
        Self {
            token: token.into(),
            compress: false,
            large_threshold: 250,
            shard: [shard_id, shard_count],
            properties: IdentifyProperties::current(),
        }
    }

    #[must_use]
    pub fn with_large_threshold(mut self, large_threshold: u32) -> Self {
        self.large_threshold = large_threshold;
        self
    }
}

/// Connection properties reported on identify
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
    pub referrer: String,
    pub referring_domain: String,
}

impl IdentifyProperties {
    /// Properties describing this library on the host OS
    #[must_use]
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: env!("CARGO_PKG_NAME").to_string(),
            device: env!("CARGO_PKG_NAME").to_string(),
            referrer: String::new(),
            referring_domain: String::new(),
        }
    }
}

/// Payload for op 6 (Resume)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    /// Last sequence number received
    pub seq: Option<u64>,
}

/// `d` of the READY dispatch; only the fields the session needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyPayload {
    /// Gateway protocol version
    #[serde(default)]
    pub v: u8,
    pub session_id: String,
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

/// Response of `GET /gateway/bot`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInfo {
    /// Gateway WebSocket URL without query
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
}
