//! # Controller Configuration
//!
//! Runtime settings loaded from environment variables.
//!
//! Flags cover what the envoy manager exposes to Envoy; these settings tune
//! the controller itself and are usually populated from a ConfigMap through
//! `envFrom` in the deployment.

use crate::constants::{DEFAULT_BACKOFF_MAX_MS, DEFAULT_BACKOFF_START_MS, DEFAULT_LIST_TIMEOUT_SECS};
use crate::controller::backoff::ExponentialBackoff;
use crate::observability::logging::LogFormat;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Exponential backoff starting value (milliseconds)
    /// Delay before retrying the first failed sync
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value (milliseconds)
    pub backoff_max_ms: u64,
    /// How long a sync waits for the initial Service and Pod lists (seconds)
    pub list_timeout_secs: u64,
    /// Log format (json, text)
    pub log_format: LogFormat,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            list_timeout_secs: DEFAULT_LIST_TIMEOUT_SECS,
            log_format: LogFormat::Json,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            backoff_start_ms: var_or_default(&lookup, "BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: var_or_default(&lookup, "BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            list_timeout_secs: var_or_default(
                &lookup,
                "LIST_TIMEOUT_SECS",
                DEFAULT_LIST_TIMEOUT_SECS,
            ),
            log_format: var_or_default(&lookup, "LOG_FORMAT", LogFormat::Json),
        }
    }

    /// Fresh backoff for the sync retry loop
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.backoff_start_ms, self.backoff_max_ms)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_secs(self.list_timeout_secs)
    }
}

/// Read a variable and parse it, falling back to `default` when unset or invalid
fn var_or_default<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> ControllerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ControllerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.backoff_start_ms, DEFAULT_BACKOFF_START_MS);
        assert_eq!(config.backoff_max_ms, DEFAULT_BACKOFF_MAX_MS);
        assert_eq!(config.list_timeout(), Duration::from_secs(DEFAULT_LIST_TIMEOUT_SECS));
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_overrides_from_env() {
        let config = config_from(&[
            ("BACKOFF_START_MS", "100"),
            ("BACKOFF_MAX_MS", "2000"),
            ("LIST_TIMEOUT_SECS", "5"),
            ("LOG_FORMAT", "text"),
        ]);
        assert_eq!(config.backoff_start_ms, 100);
        assert_eq!(config.backoff_max_ms, 2000);
        assert_eq!(config.list_timeout_secs, 5);
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.backoff().next_backoff_ms(), 100);
    }

    #[test]
    fn test_invalid_values_fall_back_to_defaults() {
        let config = config_from(&[("BACKOFF_START_MS", "soon"), ("LOG_FORMAT", "xml")]);
        assert_eq!(config.backoff_start_ms, DEFAULT_BACKOFF_START_MS);
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
