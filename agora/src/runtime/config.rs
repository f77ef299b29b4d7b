//! Network configuration

use super::{Result, RuntimeError};
use serde::{Deserialize, Serialize};

/// Default fixpoint bound per turn
pub const DEFAULT_MAX_ROUNDS: usize = 100_000;

/// Settings for one ground network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Name used in logs and as the dataspace name
    pub name: String,

    /// Rounds a turn may take before it is reported as livelocked
    pub max_rounds: usize,

    /// Publish `observe(P)` for every subscription
    pub observe_interest: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            name: "ground".to_string(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            observe_interest: true,
        }
    }
}

impl NetworkConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn with_observe_interest(mut self, enabled: bool) -> Self {
        self.observe_interest = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 {
            return Err(RuntimeError::Config("max_rounds must be positive".into()));
        }
        if self.name.is_empty() {
            return Err(RuntimeError::Config("name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.max_rounds, DEFAULT_MAX_ROUNDS);
        assert!(config.observe_interest);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_rounds_rejected() {
        let config = NetworkConfig::default().with_max_rounds(0);
        assert!(matches!(config.validate(), Err(RuntimeError::Config(_))));
    }
}
