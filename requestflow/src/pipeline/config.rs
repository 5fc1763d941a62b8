//! Pipeline configuration.

use crate::errors::ConfigError;
use crate::interceptors::{ChallengeConfig, FallbackRetryConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Configuration for a [`Pipeline`](super::Pipeline).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Label identifying the pipeline in logs and errors.
    #[serde(default = "default_label")]
    pub label: String,
    /// User agent set on requests that do not carry one.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Headers set on requests that do not carry them.
    #[serde(default)]
    pub additional_headers: BTreeMap<String, String>,
    /// Maximum number of redirects followed per attempt.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Per-exchange timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    /// Retry policy applied when every retrier defers.
    #[serde(default)]
    pub fallback_retry: FallbackRetryConfig,
    /// Anti-automation challenge signatures.
    #[serde(default)]
    pub challenge: ChallengeConfig,
}

fn default_label() -> String {
    "requestflow".to_string()
}

fn default_user_agent() -> String {
    concat!("requestflow/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_redirects() -> usize {
    10
}

fn default_timeout() -> u64 {
    30
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            user_agent: default_user_agent(),
            additional_headers: BTreeMap::new(),
            max_redirects: default_max_redirects(),
            timeout_seconds: default_timeout(),
            fallback_retry: FallbackRetryConfig::default(),
            challenge: ChallengeConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Adds an additional header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers.insert(name.into(), value.into());
        self
    }

    /// Sets the redirect limit.
    #[must_use]
    pub const fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub const fn with_timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sets the fallback retry policy.
    #[must_use]
    pub fn with_fallback_retry(mut self, fallback_retry: FallbackRetryConfig) -> Self {
        self.fallback_retry = fallback_retry;
        self
    }

    /// Sets the challenge signatures.
    #[must_use]
    pub fn with_challenge(mut self, challenge: ChallengeConfig) -> Self {
        self.challenge = challenge;
        self
    }

    /// Gets the timeout as a Duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
