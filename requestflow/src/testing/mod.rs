//! Testing utilities for code built on requestflow.
//!
//! This module provides:
//! - A scripted mock transport that records every request
//! - Pipeline fixtures with retry delays removed

mod fixtures;
mod mocks;

pub use fixtures::{instant_config, test_pipeline};
pub use mocks::{MockResponse, MockTransport};
