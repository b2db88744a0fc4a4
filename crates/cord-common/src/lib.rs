//! # cord-common
//!
//! Shared utilities: environment configuration and telemetry.

pub mod config;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    AppConfig, AppSettings, ClientSettings, ConfigError, Environment, GatewaySettings,
    ReactorSettings,
};
pub use telemetry::{
    try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};
