use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::{DEFAULT_GRACE_WINDOW_MS, DEFAULT_MAX_RECORDS, DEFAULT_SEARCH_DEBOUNCE_MS};

pub const MAX_GRACE_WINDOW_MS: u64 = 60_000;
pub const MAX_SEARCH_DEBOUNCE_MS: u64 = 5_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Delay between `remove` and the remote `delete`.
    pub grace_window_ms: u64,
    /// Quiet period before a search box value is applied.
    pub search_debounce_ms: u64,
    /// Upper bound on records held locally; creates beyond it are refused.
    pub max_records: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            grace_window_ms: DEFAULT_GRACE_WINDOW_MS,
            search_debounce_ms: DEFAULT_SEARCH_DEBOUNCE_MS,
            max_records: DEFAULT_MAX_RECORDS,
        }
    }
}

impl StoreConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_grace_window(mut self, grace: Duration) -> Self {
        self.grace_window_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub const fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }

    #[must_use]
    pub const fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grace_window_ms == 0 {
            return Err(ConfigError::Invalid("grace_window_ms must be > 0".into()));
        }
        if self.grace_window_ms > MAX_GRACE_WINDOW_MS {
            return Err(ConfigError::Invalid(format!(
                "grace_window_ms must be at most {MAX_GRACE_WINDOW_MS}"
            )));
        }
        if self.search_debounce_ms > MAX_SEARCH_DEBOUNCE_MS {
            return Err(ConfigError::Invalid(format!(
                "search_debounce_ms must be at most {MAX_SEARCH_DEBOUNCE_MS}"
            )));
        }
        if self.max_records == 0 {
            return Err(ConfigError::Invalid("max_records must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.grace_window(), Duration::from_millis(5000));
    }

    #[test]
    fn test_from_json_fills_missing_fields() {
        let config = StoreConfig::from_json(r#"{ "grace_window_ms": 1500 }"#).unwrap();
        assert_eq!(config.grace_window_ms, 1500);
        assert_eq!(config.search_debounce_ms, DEFAULT_SEARCH_DEBOUNCE_MS);
    }

    #[test]
    fn test_from_json_rejects_unknown_and_invalid() {
        assert!(matches!(
            StoreConfig::from_json(r#"{ "grace": 1 }"#),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            StoreConfig::from_json(r#"{ "grace_window_ms": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            StoreConfig::from_json(r#"{ "max_records": 0 }"#),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_grace_window_upper_bound() {
        let config = StoreConfig::default().with_grace_window(Duration::from_secs(120));
        assert!(config.validate().is_err());
    }
}
