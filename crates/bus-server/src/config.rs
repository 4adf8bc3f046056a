//! Server configuration.

use serde::{Deserialize, Serialize};

use crate::connection::DEFAULT_OUTBOX_SIZE;
use crate::error::BusError;

/// Default cap on extra channel names per connection.
pub const DEFAULT_MAX_ALIASES: usize = 64;

/// Routing behaviour of the bus server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Publish processed messages nobody explicitly delivered or consumed.
    pub auto_propagate: bool,
    /// Let frames with unregistered actions through the parser.
    pub accept_unregistered_actions: bool,
    /// Events buffered per connection before deliveries are dropped.
    pub outbound_buffer: usize,
    /// Aliases a single connection may hold.
    pub max_aliases_per_connection: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            auto_propagate: true,
            accept_unregistered_actions: false,
            outbound_buffer: DEFAULT_OUTBOX_SIZE,
            max_aliases_per_connection: DEFAULT_MAX_ALIASES,
        }
    }
}

impl ServerConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), BusError> {
        if self.outbound_buffer == 0 {
            return Err(BusError::Config("outbound_buffer cannot be 0".into()));
        }
        Ok(())
    }
}
