//! Bounded fallback retry policy with configurable backoff and jitter.
//!
//! The fallback applies only after every registered retrier deferred on a
//! transport failure.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// delay = base * 2^retry
    #[default]
    Exponential,
    /// delay = base * (retry + 1)
    Linear,
    /// delay = base (constant)
    Constant,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Configuration for the fallback retry policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackRetryConfig {
    /// Maximum number of fallback retries.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay between retries in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter: JitterStrategy,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for FallbackRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff: BackoffStrategy::default(),
            jitter: JitterStrategy::default(),
        }
    }
}

impl FallbackRetryConfig {
    /// Creates a new config with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum retries.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub const fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub const fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub const fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter = strategy;
        self
    }
}

/// The bounded retry policy applied when the retrier chain defers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackRetryPolicy {
    config: FallbackRetryConfig,
}

impl FallbackRetryPolicy {
    /// Creates a policy from its configuration.
    #[must_use]
    pub const fn new(config: FallbackRetryConfig) -> Self {
        Self { config }
    }

    /// Returns the retry cap.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Returns the delay before fallback retry number `retries_used + 1`,
    /// or `None` once the cap is reached.
    #[must_use]
    pub fn next_delay(&self, retries_used: u32) -> Option<Duration> {
        if retries_used >= self.config.max_retries {
            return None;
        }
        Some(self.delay_for(retries_used))
    }

    fn delay_for(&self, retry: u32) -> Duration {
        let base = self.config.base_delay_ms;
        let max = self.config.max_delay_ms;

        let delay = match self.config.backoff {
            BackoffStrategy::Exponential => base.saturating_mul(2u64.saturating_pow(retry)),
            BackoffStrategy::Linear => base.saturating_mul(u64::from(retry) + 1),
            BackoffStrategy::Constant => base,
        }
        .min(max);

        let jittered = match self.config.jitter {
            JitterStrategy::None => delay,
            JitterStrategy::Full => {
                if delay == 0 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..=delay)
                }
            }
            JitterStrategy::Equal => {
                let half = delay / 2;
                if half == 0 {
                    delay
                } else {
                    half + rand::thread_rng().gen_range(0..=half)
                }
            }
        };

        Duration::from_millis(jittered)
    }
}

impl Default for FallbackRetryPolicy {
    fn default() -> Self {
        Self::new(FallbackRetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(backoff: BackoffStrategy) -> FallbackRetryPolicy {
        FallbackRetryPolicy::new(
            FallbackRetryConfig::new()
                .with_base_delay_ms(100)
                .with_max_delay_ms(1_000)
                .with_backoff(backoff),
        )
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = policy(BackoffStrategy::Exponential);
        assert_eq!(policy.next_delay(0), Some(Duration::from_millis(100)));
        assert_eq!(policy.next_delay(1), Some(Duration::from_millis(200)));
        assert_eq!(policy.next_delay(2), Some(Duration::from_millis(400)));
    }

    #[test]
    fn test_linear_and_constant_backoff() {
        assert_eq!(policy(BackoffStrategy::Linear).next_delay(2), Some(Duration::from_millis(300)));
        assert_eq!(policy(BackoffStrategy::Constant).next_delay(2), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_cap_is_enforced() {
        let policy = policy(BackoffStrategy::Exponential);
        assert_eq!(policy.max_retries(), 3);
        assert!(policy.next_delay(3).is_none());
        assert!(policy.next_delay(10).is_none());
    }

    #[test]
    fn test_max_delay_caps_growth() {
        let policy = FallbackRetryPolicy::new(
            FallbackRetryConfig::new()
                .with_max_retries(20)
                .with_base_delay_ms(100)
                .with_max_delay_ms(500),
        );
        assert_eq!(policy.next_delay(10), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_full_jitter_bounds() {
        let policy = FallbackRetryPolicy::new(
            FallbackRetryConfig::new()
                .with_base_delay_ms(100)
                .with_jitter(JitterStrategy::Full),
        );

        for _ in 0..100 {
            let delay = policy.next_delay(0).unwrap_or_default();
            assert!(delay <= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: FallbackRetryConfig =
            serde_json::from_str(r#"{"max_retries": 5, "backoff": "linear"}"#)
                .unwrap_or_else(|e| panic!("config should parse: {e}"));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.backoff, BackoffStrategy::Linear);
        assert_eq!(config.base_delay_ms, 250);
    }
}
