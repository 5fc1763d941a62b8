//! The pipeline: shared chains and settings every request goes through.
//!
//! A [`Pipeline`] owns its adapter, retrier and validator chains, the
//! redirect policy and the task registry. Requests only hold a weak handle
//! to that state, so dropping the pipeline fails in-flight work at its next
//! step with [`AdaptationError::OwnerReleased`](crate::errors::AdaptationError::OwnerReleased).

mod builder;
mod config;
mod execution;


pub use builder::{IntoRequest, RequestBuilder, RequestHandling};
pub use config::PipelineConfig;

use crate::credentials::{CredentialProvider, CredentialSlot, CredentialValidator};
use crate::errors::{ConfigError, PipelineError, PipelineOrigin};
use crate::interceptors::{
    AdapterChain, ChallengeDetector, FallbackRetryPolicy, RequestAdapter, Retrier, RetrierChain,
    Validator, ValidatorChain,
};
use crate::redirect::{RedirectPolicy, RedirectRegistry};
use crate::task::TaskRegistry;
use crate::transport::{ReqwestTransport, Transport};
use builder::RequestSource;
use execution::PipelineShared;
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Request;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// A configured request pipeline.
pub struct Pipeline {
    shared: Arc<PipelineShared>,
}

impl Pipeline {
    /// Creates a pipeline dispatching through `transport`.
    pub fn new(config: PipelineConfig, transport: Arc<dyn Transport>) -> Result<Self, ConfigError> {
        let origin = PipelineOrigin::new(config.label.as_str());
        let identity = parse_value(&config.user_agent)?;
        let additional_headers = parse_headers(&config.additional_headers)?;

        let credentials: CredentialSlot = Arc::new(RwLock::new(None));
        let detector = ChallengeDetector::new(config.challenge.clone())?;
        let validators = ValidatorChain::new(vec![
            Arc::new(detector) as Arc<dyn Validator>,
            Arc::new(CredentialValidator::new(credentials.clone())),
        ]);
        let redirects = RedirectPolicy::new(
            Arc::new(config.challenge.clone()),
            Arc::new(RedirectRegistry::new()),
        );

        info!(pipeline = %origin, max_redirects = config.max_redirects, "Pipeline created");

        Ok(Self {
            shared: Arc::new(PipelineShared {
                origin,
                transport,
                adapters: AdapterChain::new(),
                retriers: RetrierChain::new(FallbackRetryPolicy::new(config.fallback_retry)),
                validators,
                additional_headers: RwLock::new(additional_headers),
                identity: RwLock::new(identity),
                credentials,
                redirects,
                tasks: Arc::new(TaskRegistry::new()),
                max_redirects: config.max_redirects,
            }),
        })
    }

    /// Creates a pipeline over a [`ReqwestTransport`] using the configured timeout.
    pub fn with_reqwest(config: PipelineConfig) -> Result<Self, ConfigError> {
        let transport = ReqwestTransport::new(config.timeout())?;
        Self::new(config, Arc::new(transport))
    }

    /// Identity of this pipeline.
    #[must_use]
    pub fn origin(&self) -> &PipelineOrigin {
        &self.shared.origin
    }

    /// Appends a request adapter.
    pub fn enqueue_adapter<A>(&self, adapter: A)
    where
        A: RequestAdapter + 'static,
    {
        debug!(adapter = adapter.name(), "Adapter enqueued");
        self.shared.adapters.push(Arc::new(adapter));
    }

    /// Appends a retrier.
    pub fn enqueue_retrier<R>(&self, retrier: R)
    where
        R: Retrier + 'static,
    {
        debug!(retrier = retrier.name(), "Retrier enqueued");
        self.shared.retriers.push(Arc::new(retrier));
    }

    /// Appends a validator. Built-in validators always run first.
    pub fn enqueue_validator<V>(&self, validator: V)
    where
        V: Validator + 'static,
    {
        debug!(validator = validator.name(), "Validator enqueued");
        self.shared.validators.push(Arc::new(validator));
    }

    /// Installs the credential provider.
    pub fn set_credentials<C>(&self, provider: C)
    where
        C: CredentialProvider + 'static,
    {
        *self.shared.credentials.write() = Some(Arc::new(provider));
    }

    /// Removes the credential provider.
    pub fn clear_credentials(&self) {
        *self.shared.credentials.write() = None;
    }

    /// Replaces the headers added to requests that lack them.
    pub fn set_additional_headers(&self, headers: HeaderMap) {
        *self.shared.additional_headers.write() = headers;
    }

    /// Replaces the user agent set on requests that lack one.
    pub fn set_identity(&self, user_agent: &str) -> Result<(), ConfigError> {
        *self.shared.identity.write() = parse_value(user_agent)?;
        Ok(())
    }

    /// The current user agent.
    #[must_use]
    pub fn identity(&self) -> String {
        String::from_utf8_lossy(self.shared.identity.read().as_bytes()).into_owned()
    }

    /// Number of adapter and retrier evaluations currently in flight.
    #[must_use]
    pub fn in_flight_tasks(&self) -> usize {
        self.shared.tasks.len()
    }

    /// The registry of in-flight adapter and retrier evaluations.
    #[must_use]
    pub fn task_registry(&self) -> &Arc<TaskRegistry> {
        &self.shared.tasks
    }

    /// The registry of per-request redirect handlers.
    #[must_use]
    pub fn redirect_registry(&self) -> &Arc<RedirectRegistry> {
        self.shared.redirects.handlers()
    }

    /// Builds requests with `constructor`, called afresh for every attempt.
    pub fn build_request<F>(&self, constructor: F) -> RequestBuilder
    where
        F: Fn() -> Result<Request, PipelineError> + Send + Sync + 'static,
    {
        RequestBuilder::deferred(&self.shared, constructor)
    }

    /// Builds requests from a URL or `(Method, URL)` pair.
    pub fn request(&self, target: impl IntoRequest) -> RequestBuilder {
        RequestBuilder::new(&self.shared, RequestSource::from_value(target))
    }

    /// Builds requests from a fully-formed request.
    ///
    /// Retries replay a copy; requests with streaming bodies cannot be
    /// replayed and fail with an adaptation error.
    pub fn from_request(&self, request: Request) -> RequestBuilder {
        RequestBuilder::new(&self.shared, RequestSource::from_value(request))
    }
}

fn parse_value(value: &str) -> Result<HeaderValue, ConfigError> {
    HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidHeader(value.to_string()))
}

fn parse_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap, ConfigError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ConfigError::InvalidHeader(name.clone()))?;
        map.insert(name, parse_value(value)?);
    }
    Ok(map)
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        debug!(pipeline = %self.shared.origin, in_flight = self.shared.tasks.len(), "Pipeline released");
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("origin", &self.shared.origin)
            .field("adapters", &self.shared.adapters)
            .field("retriers", &self.shared.retriers)
            .field("validators", &self.shared.validators)
            .field("max_redirects", &self.shared.max_redirects)
            .finish_non_exhaustive()
    }
}
