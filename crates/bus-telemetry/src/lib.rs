//! # Bus Telemetry
//!
//! Structured logging for the relay bus.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bus_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     init_telemetry(&TelemetryConfig::from_env()).expect("Failed to init telemetry");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `BUS_SERVICE_NAME` | `relay-bus` | Service name in logs |
//! | `BUS_LOG_LEVEL` | `info` | Log level filter (`RUST_LOG` also honoured) |
//! | `BUS_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `BUS_JSON_LOGS` | `false` | JSON lines instead of pretty output |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::{env_filter, init_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Failed to install tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Initialize logging for a relay bus process.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    init_logging(config)
}
