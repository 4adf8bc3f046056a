//! # Relay Bus
//!
//! Entry point for the relay bus server.
//!
//! Configuration comes from the optional TOML file named by `BUS_CONFIG`
//! with `BUS_*` environment overrides on top; see [`bus_runtime::config`].

use anyhow::{Context, Result};
use bus_runtime::{load_config, BusRuntime};
use bus_telemetry::init_telemetry;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = load_config().context("Failed to load configuration")?;

    init_telemetry(&config.telemetry).context("Failed to initialize telemetry")?;
    info!(service = %config.telemetry.service_name, "Configuration loaded");

    let runtime = BusRuntime::new(config).context("Failed to build relay bus")?;

    runtime
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                return;
            }
            info!("Shutdown signal received");
        })
        .await
        .context("Relay bus stopped with an error")?;

    Ok(())
}
