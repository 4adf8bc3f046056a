//! Gateway error types.

use bus_server::BusError;
use thiserror::Error;

/// Errors starting or running the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid gateway configuration: {0}")]
    Config(String),

    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    #[error(transparent)]
    Bus(#[from] BusError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            GatewayError::Config("rate_limit cannot be 0".into()).to_string(),
            "invalid gateway configuration: rate_limit cannot be 0"
        );
        assert_eq!(
            GatewayError::from(BusError::NoRuntime).to_string(),
            "no tokio runtime available"
        );
    }
}
