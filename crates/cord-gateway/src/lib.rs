//! # cord-gateway
//!
//! Gateway client: protocol types, the shard state machine and its reactor
//! runner, the REST controller and the client that ties them together.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod protocol;
pub mod shard;

pub use client::{ApiClient, ApiError, Client};
pub use config::{ClientConfig, ShardConfig};
pub use error::{GatewayError, GatewayResult};
pub use events::{DispatchEvent, EventHandler, LoggingHandler, SharedEventHandler};
pub use shard::{Shard, ShardSession, ShardState};
