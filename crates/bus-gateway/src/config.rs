//! Gateway configuration with validation.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::GatewayError;

/// Default maximum message size (1MB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default rate limit (100 messages per second)
pub const DEFAULT_RATE_LIMIT: u32 = 100;

/// WebSocket gateway configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 8080)
    pub port: u16,
    /// Route serving the WebSocket upgrade
    pub path: String,
    /// Maximum message size in bytes
    pub max_message_size: usize,
    /// Rate limit (messages per second per connection)
    pub rate_limit: u32,
    /// Seconds between server pings
    pub ping_interval_secs: u64,
    /// Disconnect after this many seconds without a client message
    pub idle_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 8080,
            path: "/".to_string(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            rate_limit: DEFAULT_RATE_LIMIT,
            ping_interval_secs: 30,
            idle_timeout_secs: 300,
        }
    }
}

impl GatewayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), GatewayError> {
        if !self.path.starts_with('/') {
            return Err(GatewayError::Config(format!(
                "path must start with '/': {}",
                self.path
            )));
        }

        if self.path == "/health" || self.path == "/metrics" {
            return Err(GatewayError::Config(format!(
                "path {} is reserved",
                self.path
            )));
        }

        if self.max_message_size == 0 {
            return Err(GatewayError::Config("max_message_size cannot be 0".into()));
        }

        if self.rate_limit == 0 {
            return Err(GatewayError::Config("rate_limit cannot be 0".into()));
        }

        if self.ping_interval_secs == 0 || self.idle_timeout_secs == 0 {
            return Err(GatewayError::Config(
                "ping_interval_secs and idle_timeout_secs must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Get the bind address
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.addr().port(), 8080);
        assert_eq!(config.ping_interval(), Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_values() {
        let cases = [
            GatewayConfig {
                path: "ws".into(),
                ..Default::default()
            },
            GatewayConfig {
                path: "/health".into(),
                ..Default::default()
            },
            GatewayConfig {
                max_message_size: 0,
                ..Default::default()
            },
            GatewayConfig {
                rate_limit: 0,
                ..Default::default()
            },
            GatewayConfig {
                idle_timeout_secs: 0,
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(GatewayError::Config(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_deserialize_partial() {
        let config: GatewayConfig =
            serde_json::from_str(r#"{"port": 9000, "path": "/bus"}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.path, "/bus");
        assert_eq!(config.rate_limit, DEFAULT_RATE_LIMIT);
    }
}
