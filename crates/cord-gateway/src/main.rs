//! Gateway client entry point
//!
//! Run with:
//! ```bash
//! CORD_TOKEN=... cargo run -p cord-gateway
//! ```
//!
//! Configuration is loaded from environment variables.

use anyhow::Context;
use cord_common::{try_init_tracing_with_config, AppConfig, TracingConfig};
use cord_gateway::{Client, ClientConfig, LoggingHandler};
use cord_io::{Reactor, ReactorConfig};
use tracing::{error, info};

fn main() {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_app(&config.app)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run(&config) {
        error!(error = ?e, "Gateway client failed");
        std::process::exit(1);
    }
}

fn run(config: &AppConfig) -> anyhow::Result<()> {
    info!(env = ?config.app.env, shards = config.client.shards, "Starting gateway client");

    let mut reactor =
        Reactor::new(ReactorConfig::from(&config.reactor)).context("failed to create reactor")?;
    let client = Client::new(ClientConfig::from(config), LoggingHandler::shared());

    client.run(&mut reactor).context("gateway client stopped")?;
    Ok(())
}
