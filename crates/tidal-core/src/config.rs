//! Store configuration
//!
//! Settings that shape a store's dispatch loop. Configs are plain serde
//! values and can be loaded from RON:
//!
//! ```
//! use tidal_core::StoreConfig;
//!
//! let config = StoreConfig::from_ron("(name: \"app\", max_actions_per_drain: 64)").unwrap();
//! assert_eq!(config.name(), "app");
//! assert_eq!(config.max_actions_per_drain(), 64);
//! ```

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Default bound on actions reduced by a single drain
pub const DEFAULT_MAX_ACTIONS_PER_DRAIN: usize = 10_000;

/// Configuration for a [`Store`](crate::Store)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Label recorded on the store's tracing spans
    name: String,

    /// Upper bound on actions reduced by one drain
    ///
    /// Protects against reducers that keep re-sending synchronously.
    /// Clamped to at least 1.
    max_actions_per_drain: usize,
}

impl StoreConfig {
    /// Create a default configuration with the given name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from RON text
    pub fn from_ron(text: &str) -> Result<Self> {
        let mut config: StoreConfig = ron::from_str(text)?;
        config.max_actions_per_drain = config.max_actions_per_drain.max(1);
        Ok(config)
    }

    /// Get the store name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the per-drain action limit
    pub fn max_actions_per_drain(&self) -> usize {
        self.max_actions_per_drain
    }

    /// Set the per-drain action limit
    ///
    /// The value is clamped to at least 1.
    pub fn with_max_actions_per_drain(mut self, limit: usize) -> Self {
        self.max_actions_per_drain = limit.max(1);
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: "store".to_string(),
            max_actions_per_drain: DEFAULT_MAX_ACTIONS_PER_DRAIN,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.name(), "store");
        assert_eq!(config.max_actions_per_drain(), DEFAULT_MAX_ACTIONS_PER_DRAIN);
    }

    #[test]
    fn test_limit_clamped_minimum() {
        let config = StoreConfig::default().with_max_actions_per_drain(0);
        assert_eq!(config.max_actions_per_drain(), 1);

        let config = StoreConfig::from_ron("(max_actions_per_drain: 0)").unwrap();
        assert_eq!(config.max_actions_per_drain(), 1);
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let config = StoreConfig::from_ron("(name: \"counter\")").unwrap();
        assert_eq!(config, StoreConfig::named("counter"));
    }

    #[test]
    fn test_invalid_ron_is_config_error() {
        let err = StoreConfig::from_ron("(name: 12").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
