//! Client and shard settings derived from [`AppConfig`]

use std::time::Duration;

use cord_common::AppConfig;

use crate::shard::ReconnectPolicy;

/// Per-shard session settings
#[derive(Debug, Clone)]
pub struct ShardConfig {
    pub token: String,
    pub large_threshold: u32,
    /// Wait after INVALID_SESSION before dropping the connection
    pub invalid_session_delay: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ShardConfig {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            large_threshold: 250,
            invalid_session_delay: Duration::from_millis(2500),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl From<&AppConfig> for ShardConfig {
    fn from(config: &AppConfig) -> Self {
        let gateway = &config.gateway;
        Self {
            token: config.client.token.clone(),
            large_threshold: gateway.large_threshold,
            invalid_session_delay: Duration::from_millis(gateway.invalid_session_delay_ms),
            reconnect: ReconnectPolicy {
                connect_retry: Duration::from_millis(gateway.connect_retry_ms),
                reconnect_delay: Duration::from_millis(gateway.reconnect_delay_ms),
                stop_on_fatal_close: gateway.stop_on_fatal_close,
            },
        }
    }
}

/// Settings for [`Client`](crate::client::Client)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub token: String,
    /// REST base URL without trailing slash
    pub api_base: String,
    pub api_version: u8,
    /// Fixed shard count; `None` uses the count from `/gateway/bot`
    pub shards: Option<u32>,
    /// Wait before retrying gateway discovery
    pub login_retry: Duration,
    pub shard: ShardConfig,
}

impl ClientConfig {
    #[must_use]
    pub fn new(token: impl Into<String>, api_base: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            shard: ShardConfig::new(token.clone()),
            token,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_version: 6,
            shards: None,
            login_retry: Duration::from_secs(5),
        }
    }
}

impl From<&AppConfig> for ClientConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            token: config.client.token.clone(),
            api_base: config.client.api_base.clone(),
            api_version: config.client.api_version,
            shards: (config.client.shards > 0).then_some(config.client.shards),
            login_retry: Duration::from_millis(config.gateway.connect_retry_ms),
            shard: ShardConfig::from(config),
        }
    }
}
