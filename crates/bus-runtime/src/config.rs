//! # Runtime Configuration
//!
//! Unified configuration for the server, exchange, gateway and telemetry.
//!
//! ## Sources
//!
//! 1. Defaults
//! 2. TOML file named by `BUS_CONFIG` (optional)
//! 3. `BUS_*` environment overrides
//!
//! ```toml
//! demo = true
//!
//! [server]
//! auto_propagate = true
//!
//! [gateway]
//! port = 9000
//! path = "/bus"
//! ```

use bus_gateway::GatewayConfig;
use bus_server::{ExchangeConfig, ServerConfig};
use bus_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub server: ServerConfig,
    pub exchange: ExchangeConfig,
    pub gateway: GatewayConfig,
    pub telemetry: TelemetryConfig,
    /// Install the shout demo handlers.
    pub demo: bool,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidVar { key: &'static str, value: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl BusConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.exchange
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.gateway
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    /// Apply `BUS_*` overrides from `lookup`.
    ///
    /// # Environment Variables
    ///
    /// - `BUS_HOST`, `BUS_PORT`, `BUS_PATH`: gateway listen address and route
    /// - `BUS_MAX_MESSAGE_SIZE`, `BUS_RATE_LIMIT`: per-connection limits
    /// - `BUS_AUTO_PROPAGATE`: re-publish processed messages without a decision
    /// - `BUS_ACCEPT_UNREGISTERED`: accept actions with no handler
    /// - `BUS_OUTBOUND_BUFFER`, `BUS_MAX_ALIASES`: per-connection sizing
    /// - `BUS_CHANNEL_CAPACITY`: pub/sub buffer per channel
    /// - `BUS_DEMO`: install the shout demo
    /// - `BUS_SERVICE_NAME`, `BUS_LOG_LEVEL`/`RUST_LOG`, `BUS_CONSOLE_OUTPUT`,
    ///   `BUS_JSON_LOGS`: telemetry
    pub fn apply_overrides(
        &mut self,
        lookup: &impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(host) = parsed(lookup, "BUS_HOST")? {
            self.gateway.host = host;
        }
        if let Some(port) = parsed(lookup, "BUS_PORT")? {
            self.gateway.port = port;
        }
        if let Some(path) = lookup("BUS_PATH") {
            self.gateway.path = path;
        }
        if let Some(size) = parsed(lookup, "BUS_MAX_MESSAGE_SIZE")? {
            self.gateway.max_message_size = size;
        }
        if let Some(limit) = parsed(lookup, "BUS_RATE_LIMIT")? {
            self.gateway.rate_limit = limit;
        }

        if let Some(enabled) = flag(lookup, "BUS_AUTO_PROPAGATE")? {
            self.server.auto_propagate = enabled;
        }
        if let Some(enabled) = flag(lookup, "BUS_ACCEPT_UNREGISTERED")? {
            self.server.accept_unregistered_actions = enabled;
        }
        if let Some(size) = parsed(lookup, "BUS_OUTBOUND_BUFFER")? {
            self.server.outbound_buffer = size;
        }
        if let Some(limit) = parsed(lookup, "BUS_MAX_ALIASES")? {
            self.server.max_aliases_per_connection = limit;
        }

        if let Some(capacity) = parsed(lookup, "BUS_CHANNEL_CAPACITY")? {
            self.exchange.channel_capacity = capacity;
        }

        if let Some(enabled) = flag(lookup, "BUS_DEMO")? {
            self.demo = enabled;
        }

        if let Some(name) = lookup("BUS_SERVICE_NAME") {
            self.telemetry.service_name = name;
        }
        if let Some(level) = lookup("BUS_LOG_LEVEL").or_else(|| lookup("RUST_LOG")) {
            self.telemetry.log_level = level;
        }
        if let Some(enabled) = flag(lookup, "BUS_CONSOLE_OUTPUT")? {
            self.telemetry.console_output = enabled;
        }
        if let Some(enabled) = flag(lookup, "BUS_JSON_LOGS")? {
            self.telemetry.json_logs = enabled;
        }

        Ok(())
    }
}

/// Load configuration from the process environment.
pub fn load_config() -> Result<BusConfig, ConfigError> {
    load_config_from(|key| env::var(key).ok())
}

/// Load configuration from an arbitrary variable source.
pub fn load_config_from(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<BusConfig, ConfigError> {
    let mut config = match lookup("BUS_CONFIG") {
        Some(path) => BusConfig::from_file(Path::new(&path))?,
        None => BusConfig {
            telemetry: TelemetryConfig::from_lookup(&lookup),
            ..Default::default()
        },
    };

    config.apply_overrides(&lookup)?;
    config.validate()?;
    Ok(config)
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
{
    lookup(key)
        .map(|value| {
            let parsed = value.trim().parse();
            parsed.map_err(|_| ConfigError::InvalidVar { key, value })
        })
        .transpose()
}

fn flag(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<bool>, ConfigError> {
    lookup(key)
        .map(|value| {
            let normalized = value.trim().to_lowercase();
            match normalized.as_str() {
                "true" | "1" | "yes" | "on" => Ok(true),
                "false" | "0" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::InvalidVar { key, value }),
            }
        })
        .transpose()
}
