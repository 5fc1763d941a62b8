//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events and spans; applications opt in to
//! output by calling [`init_tracing`] once at startup.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Plain,
    /// One JSON object per event.
    Json,
}

/// Installs a global fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    match format {
        LogFormat::Plain => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    }
    .map_err(|e| ConfigError::Tracing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let _ = init_tracing(LogFormat::Plain);
        assert!(matches!(init_tracing(LogFormat::Json), Err(ConfigError::Tracing(_))));
    }

    #[test]
    fn test_format_parses() {
        let format: LogFormat = serde_json::from_str(r#""json""#).unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(format, LogFormat::Json);
    }
}
