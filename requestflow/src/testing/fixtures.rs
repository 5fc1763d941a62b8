//! Pipeline fixtures.

use super::MockTransport;
use crate::errors::ConfigError;
use crate::interceptors::FallbackRetryConfig;
use crate::pipeline::{Pipeline, PipelineConfig};
use std::sync::Arc;

/// Default configuration with zero fallback retry delay.
#[must_use]
pub fn instant_config() -> PipelineConfig {
    PipelineConfig::new()
        .with_label("test")
        .with_fallback_retry(FallbackRetryConfig::new().with_base_delay_ms(0).with_max_delay_ms(0))
}

/// A pipeline over a fresh [`MockTransport`] using [`instant_config`].
pub fn test_pipeline() -> Result<(Pipeline, Arc<MockTransport>), ConfigError> {
    let transport = Arc::new(MockTransport::new());
    let pipeline = Pipeline::new(instant_config(), transport.clone())?;
    Ok((pipeline, transport))
}
