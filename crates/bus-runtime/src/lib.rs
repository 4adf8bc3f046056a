//! # Relay Bus Runtime
//!
//! Assembles a runnable bus from configuration.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration (defaults, TOML file, `BUS_*` environment)
//! 2. Initialize telemetry
//! 3. Build the exchange and the server
//! 4. Install the shout demo when enabled
//! 5. Serve the WebSocket gateway until shutdown
//! 6. Stop the queue consumer and all channel forwarders

pub mod config;
pub mod demo;

use bus_gateway::{GatewayError, GatewayService};
use bus_server::{BusError, Exchange, Server};
use bus_telemetry::log_event;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

pub use config::{load_config, load_config_from, BusConfig, ConfigError};

/// Errors assembling or running the bus.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// A configured bus server plus its gateway.
pub struct BusRuntime {
    server: Server,
    gateway: GatewayService,
}

impl BusRuntime {
    /// Build the exchange, server and gateway described by `config`.
    pub fn new(config: BusConfig) -> Result<Self, RuntimeError> {
        config.validate()?;

        let exchange = Arc::new(Exchange::from_config(&config.exchange));
        let server = Server::builder()
            .config(config.server.clone())
            .exchange(exchange)
            .build()?;

        if config.demo {
            demo::install(&server);
            log_event!(info, "runtime", "Shout demo installed", channel = demo::DEMO_CHANNEL);
        }

        let gateway = GatewayService::new(config.gateway, server.clone())?;

        Ok(Self { server, gateway })
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Serve until `shutdown` resolves, then stop the bus.
    pub async fn run<F>(self, shutdown: F) -> Result<(), RuntimeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self { server, gateway } = self;
        log_event!(
            info,
            "runtime",
            "Relay bus starting",
            addr = %gateway.config().addr(),
            path = %gateway.config().path,
            auto_propagate = server.auto_propagate()
        );

        let served = gateway.serve(shutdown).await;
        server.shutdown();

        match served {
            Ok(()) => {
                log_event!(info, "runtime", "Relay bus stopped");
                Ok(())
            }
            Err(e) => {
                log_event!(error, "runtime", "Gateway failed", error = %e);
                Err(e.into())
            }
        }
    }
}
