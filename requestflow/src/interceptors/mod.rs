//! Interceptor chains (middleware) around request dispatch.

mod adapter;
mod backoff;
mod challenge;
mod retrier;
mod validator;

pub use adapter::{AdapterChain, AdapterResult, HeaderAdapter, RequestAdapter};
pub use backoff::{BackoffStrategy, FallbackRetryConfig, FallbackRetryPolicy, JitterStrategy};
pub use challenge::{ChallengeConfig, ChallengeDetector};
pub use retrier::{Retrier, RetrierChain, RetryContext, RetryDirective, RetryOn, RetryOutcome};
pub use validator::{StatusCodeValidator, Validator, ValidatorChain};
