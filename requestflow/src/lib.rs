//! # Requestflow
//!
//! A promise-based HTTP request pipeline.
//!
//! Every request issued through a [`Pipeline`](pipeline::Pipeline) goes through
//! the same ordered stages:
//!
//! - **Adapter chain**: built-in credential and header defaults, then user
//!   adapters that may rewrite, intercept or fail the request
//! - **Redirect policy**: `https` upgrade, challenge-path refusal and
//!   per-request redirect handlers on every hop
//! - **Validation chain**: challenge and session detection, then user validators
//! - **Retrier chain**: user retriers, backed by a bounded fallback policy
//!
//! Each terminal operation returns an [`AsyncTask`](task::AsyncTask): a lazy,
//! cancellable promise that settles exactly once.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use requestflow::prelude::*;
//!
//! let pipeline = Pipeline::with_reqwest(PipelineConfig::new().with_label("shop"))?;
//! pipeline.enqueue_adapter(HeaderAdapter::new("X-Client", "docs")?);
//! pipeline.enqueue_retrier(RetryOn::network_blips(3));
//!
//! let page = pipeline
//!     .request("https://shop.example/")
//!     .handling(RequestHandling::Browsing)
//!     .text()
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod credentials;
pub mod decode;
pub mod errors;
pub mod interceptors;
pub mod observability;
pub mod pipeline;
pub mod redirect;
pub mod task;
pub mod testing;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::credentials::{CredentialProvider, StaticCredentials};
    #[cfg(feature = "document")]
    pub use crate::decode::Document;
    pub use crate::errors::{
        AdaptationError, ConfigError, DecodeError, PipelineError, TransportError,
        TransportErrorKind, ValidationError,
    };
    pub use crate::interceptors::{
        AdapterResult, HeaderAdapter, RequestAdapter, Retrier, RetryContext, RetryDirective,
        RetryOn, StatusCodeValidator, Validator,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{IntoRequest, Pipeline, PipelineConfig, RequestBuilder, RequestHandling};
    pub use crate::redirect::RedirectHandler;
    pub use crate::task::{AsyncTask, TaskHandle, TaskId, TaskResult};
    pub use crate::transport::{HttpResponse, RequestHead, ReqwestTransport, Transport};
}
