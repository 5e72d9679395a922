//! # Logging
//!
//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence when set. Otherwise the crate logs at `info`,
//! or `debug` when the `-debug` flag is given. `LOG_FORMAT` selects between
//! JSON lines (default) and human readable text.

use anyhow::{anyhow, Result};
use std::str::FromStr;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "console" => Ok(Self::Text),
            other => Err(anyhow!("unknown log format {other:?}, expected json or text")),
        }
    }
}

/// Default filter directive when `RUST_LOG` is unset
pub fn default_directive(debug: bool) -> String {
    let level = if debug { "debug" } else { "info" };
    format!("nodeport_proxy={level},envoy_manager={level},warn")
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(debug: bool, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("TEXT".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_default_directive_honours_debug() {
        assert!(default_directive(true).starts_with("nodeport_proxy=debug"));
        assert!(default_directive(false).starts_with("nodeport_proxy=info"));
    }
}
