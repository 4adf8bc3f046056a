//! Exchange configuration.

use serde::{Deserialize, Serialize};

use crate::{ExchangeError, DEFAULT_CHANNEL_CAPACITY};

/// Settings for the in-memory exchange backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Messages buffered per channel listener before it starts lagging.
    pub channel_capacity: usize,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl ExchangeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ExchangeError> {
        if self.channel_capacity == 0 {
            return Err(ExchangeError::InvalidConfig(
                "channel_capacity cannot be 0".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ExchangeConfig::default();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = ExchangeConfig {
            channel_capacity: 0,
        };
        assert!(matches!(
            config.validate(),
            Err(ExchangeError::InvalidConfig(_))
        ));
    }
}
