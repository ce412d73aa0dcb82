//! Engine configuration loaded from TOML

use serde::Deserialize;
use std::path::Path;

/// Deployment-tunable engine settings
#[derive(Deserialize, Debug, Clone)]
pub struct EngineConfig {
    /// Log filter passed to the tracing subscriber
    #[serde(default = "defaults::log_level")]
    pub log_level: String,
    /// Instances allocated per slot when a map becomes ready
    #[serde(default = "defaults::instance_count")]
    pub instance_count: usize,
    /// Floor for per-slot history capacity
    #[serde(default = "defaults::history_size")]
    pub history_size: usize,
}

/// Errors raised while loading an [`EngineConfig`]
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

mod defaults {
    use crate::constants::{DEFAULT_HISTORY_SIZE, DEFAULT_INSTANCE_COUNT};

    pub fn log_level() -> String {
        "info".into()
    }

    pub fn instance_count() -> usize {
        DEFAULT_INSTANCE_COUNT
    }

    pub fn history_size() -> usize {
        DEFAULT_HISTORY_SIZE
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::log_level(),
            instance_count: defaults::instance_count(),
            history_size: defaults::history_size(),
        }
    }
}

impl EngineConfig {
    /// Load a config file, applying defaults for absent fields
    pub fn load(path: impl AsRef<Path> + ToString) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config: EngineConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check field ranges against the engine limits
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instance_count == 0 {
            return Err(ConfigError::Invalid("instance_count must be > 0"));
        }
        if self.history_size == 0 || self.history_size > crate::constants::MAX_HISTORY_SIZE {
            return Err(ConfigError::Invalid(
                "history_size must be in [1, MAX_HISTORY_SIZE]",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.instance_count, 1);
    }

    #[test]
    fn test_parse_with_partial_fields() {
        let config: EngineConfig = toml::from_str("instance_count = 4").unwrap();
        assert_eq!(config.instance_count, 4);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config: EngineConfig = toml::from_str("history_size = 0").unwrap();
        assert!(config.validate().is_err());
    }
}
