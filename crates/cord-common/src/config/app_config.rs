//! Application configuration structs
//!
//! Loads configuration from environment variables and an optional `.env` file.

use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app: AppSettings,
    pub client: ClientSettings,
    pub gateway: GatewaySettings,
    pub reactor: ReactorSettings,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
    /// Force JSON log output regardless of environment
    #[serde(default)]
    pub log_json: bool,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// Credentials and REST endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSettings {
    pub token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_api_version")]
    pub api_version: u8,
    /// Number of shards to run; 0 means use the count suggested by the API
    #[serde(default)]
    pub shards: u32,
}

/// Gateway session and reconnection settings
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u32,
    #[serde(default = "default_connect_retry_ms")]
    pub connect_retry_ms: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_invalid_session_delay_ms")]
    pub invalid_session_delay_ms: u64,
    #[serde(default = "default_stop_on_fatal_close")]
    pub stop_on_fatal_close: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            large_threshold: default_large_threshold(),
            connect_retry_ms: default_connect_retry_ms(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            invalid_session_delay_ms: default_invalid_session_delay_ms(),
            stop_on_fatal_close: default_stop_on_fatal_close(),
        }
    }
}

/// Event loop settings
#[derive(Debug, Clone, Deserialize)]
pub struct ReactorSettings {
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
}

impl Default for ReactorSettings {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            max_events: default_max_events(),
            read_chunk: default_read_chunk(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "cord".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_api_base() -> String {
    "https://discordapp.com/api".to_string()
}

fn default_api_version() -> u8 {
    6
}

fn default_large_threshold() -> u32 {
    250
}

fn default_connect_retry_ms() -> u64 {
    5_000
}

fn default_reconnect_delay_ms() -> u64 {
    1_000
}

fn default_invalid_session_delay_ms() -> u64 {
    2_500
}

fn default_stop_on_fatal_close() -> bool {
    true
}

fn default_poll_timeout_ms() -> u64 {
    10
}

fn default_max_events() -> usize {
    128
}

fn default_read_chunk() -> usize {
    64 * 1024
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if `CORD_TOKEN` is missing or a numeric variable does not parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env: lookup("APP_ENV")
                    .and_then(|s| Environment::parse(&s))
                    .unwrap_or_default(),
                log_json: parse_or(&lookup, "CORD_LOG_JSON", false)?,
            },
            client: ClientSettings {
                token: lookup("CORD_TOKEN")
                    .filter(|s| !s.trim().is_empty())
                    .ok_or(ConfigError::MissingVar("CORD_TOKEN"))?,
                api_base: lookup("CORD_API_BASE")
                    .map(|s| s.trim_end_matches('/').to_string())
                    .unwrap_or_else(default_api_base),
                api_version: parse_or(&lookup, "CORD_API_VERSION", default_api_version())?,
                shards: parse_or(&lookup, "CORD_SHARDS", 0)?,
            },
            gateway: GatewaySettings {
                large_threshold: parse_or(
                    &lookup,
                    "CORD_LARGE_THRESHOLD",
                    default_large_threshold(),
                )?,
                connect_retry_ms: parse_or(
                    &lookup,
                    "CORD_CONNECT_RETRY_MS",
                    default_connect_retry_ms(),
                )?,
                reconnect_delay_ms: parse_or(
                    &lookup,
                    "CORD_RECONNECT_DELAY_MS",
                    default_reconnect_delay_ms(),
                )?,
                invalid_session_delay_ms: parse_or(
                    &lookup,
                    "CORD_INVALID_SESSION_DELAY_MS",
                    default_invalid_session_delay_ms(),
                )?,
                stop_on_fatal_close: parse_or(
                    &lookup,
                    "CORD_STOP_ON_FATAL_CLOSE",
                    default_stop_on_fatal_close(),
                )?,
            },
            reactor: ReactorSettings {
                poll_timeout_ms: parse_or(
                    &lookup,
                    "CORD_POLL_TIMEOUT_MS",
                    default_poll_timeout_ms(),
                )?,
                max_events: default_max_events(),
                read_chunk: default_read_chunk(),
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
