//! The attempt loop behind every terminal operation.
//!
//! One logical request runs as a single async state machine: construct,
//! adapt, dispatch (following redirects), observe, validate, and on failure
//! ask the retrier chain whether to go round again. Every step after an
//! await re-checks that the owning pipeline is still alive.

use super::builder::PendingRequest;
use crate::credentials::CredentialSlot;
use crate::errors::{AdaptationError, PipelineError, PipelineOrigin, TransportError, TransportErrorKind};
use crate::interceptors::{AdapterChain, RetrierChain, RetryContext, RetryOutcome, ValidatorChain};
use crate::redirect::{next_hop, RedirectPolicy};
use crate::task::{TaskId, TaskRegistry};
use crate::transport::{HttpResponse, RequestHead, Transport};
use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Request;
use std::sync::{Arc, Weak};
use tracing::{debug, field, info, info_span, warn, Instrument, Span};

/// State owned by a [`Pipeline`](super::Pipeline) and observed weakly by its
/// requests.
pub(crate) struct PipelineShared {
    pub(crate) origin: PipelineOrigin,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) adapters: AdapterChain,
    pub(crate) retriers: RetrierChain,
    pub(crate) validators: ValidatorChain,
    pub(crate) additional_headers: RwLock<HeaderMap>,
    pub(crate) identity: RwLock<HeaderValue>,
    pub(crate) credentials: CredentialSlot,
    pub(crate) redirects: RedirectPolicy,
    pub(crate) tasks: Arc<TaskRegistry>,
    pub(crate) max_redirects: usize,
}

impl PipelineShared {
    /// Credential injection, user agent and additional headers. Only the
    /// credential provider may overwrite what the caller set.
    fn apply_builtin(&self, request: &mut Request) -> Result<(), PipelineError> {
        let provider = self.credentials.read().clone();
        if let Some(provider) = provider {
            provider.authorize(request).map_err(|error| match error {
                error @ PipelineError::Adaptation(_) => error,
                other => AdaptationError::Credentials(other.to_string()).into(),
            })?;
        }

        let headers = request.headers_mut();
        headers
            .entry(USER_AGENT)
            .or_insert_with(|| self.identity.read().clone());
        let additional = self.additional_headers.read();
        let missing: Vec<_> = additional
            .keys()
            .filter(|name| !headers.contains_key(*name))
            .collect();
        for name in missing {
            for value in additional.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        Ok(())
    }
}

fn upgrade(pipeline: &Weak<PipelineShared>) -> Result<Arc<PipelineShared>, PipelineError> {
    pipeline.upgrade().ok_or_else(|| {
        warn!("Pipeline released with a request in flight");
        AdaptationError::OwnerReleased.into()
    })
}

/// Runs one logical request to completion.
pub(crate) async fn execute(
    pipeline: Weak<PipelineShared>,
    origin: PipelineOrigin,
    request_id: TaskId,
    pending: PendingRequest,
) -> Result<HttpResponse, PipelineError> {
    let span = info_span!(
        "request",
        pipeline = %origin.label,
        request = %request_id,
        method = field::Empty,
        url = field::Empty,
    );
    run(&pipeline, request_id, &pending)
        .instrument(span)
        .await
        .map_err(|error| error.with_origin(&origin))
}

async fn run(
    pipeline: &Weak<PipelineShared>,
    request_id: TaskId,
    pending: &PendingRequest,
) -> Result<HttpResponse, PipelineError> {
    let _redirect_registration = match &pending.redirect {
        Some(handler) => {
            let shared = upgrade(pipeline)?;
            Some(shared.redirects.handlers().register(request_id, handler.clone()))
        }
        None => None,
    };

    let mut attempt: u32 = 0;
    let mut fallback_used: u32 = 0;

    loop {
        attempt += 1;
        let mut dispatched = None;
        let error = match attempt_once(pipeline, request_id, pending, &mut dispatched).await {
            Ok(response) => {
                debug!(attempt, status = response.status.as_u16(), "Request succeeded");
                return Ok(response);
            }
            Err(error) => error,
        };

        if error.is_cancellation() || !error.is_retry_eligible() {
            return Err(error);
        }

        let shared = upgrade(pipeline)?;
        let ctx = RetryContext {
            request_id,
            request: dispatched,
            error,
            attempt,
        };
        let outcome = shared
            .retriers
            .evaluate(&shared.tasks, ctx, &mut fallback_used)
            .await;
        drop(shared);

        match outcome {
            RetryOutcome::Retry(delay) => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying request");
                if delay.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(delay).await;
                }
            }
            RetryOutcome::Fail(error) => return Err(error),
        }
    }
}

async fn attempt_once(
    pipeline: &Weak<PipelineShared>,
    request_id: TaskId,
    pending: &PendingRequest,
    dispatched: &mut Option<RequestHead>,
) -> Result<HttpResponse, PipelineError> {
    let request = prepare(pipeline, request_id, pending).await?;
    let head = RequestHead::from(&request);
    *dispatched = Some(head);

    let (final_head, response) = dispatch(pipeline, request_id, request).await?;

    if let Some(observer) = &pending.observer {
        observer(&response);
    }

    let shared = upgrade(pipeline)?;
    shared.validators.validate(&final_head, &response)?;
    Ok(response)
}

async fn prepare(
    pipeline: &Weak<PipelineShared>,
    request_id: TaskId,
    pending: &PendingRequest,
) -> Result<Request, PipelineError> {
    let shared = upgrade(pipeline)?;
    let mut request = pending.source.construct()?;
    pending.handling.apply(request.headers_mut());
    shared.apply_builtin(&mut request)?;

    let span = Span::current();
    span.record("method", request.method().as_str());
    span.record("url", request.url().as_str());

    shared.adapters.evaluate(&shared.tasks, request_id, request).await
}

/// Sends `request`, following redirects the policy accepts. Returns the head
/// of the last request sent together with its response.
async fn dispatch(
    pipeline: &Weak<PipelineShared>,
    request_id: TaskId,
    mut request: Request,
) -> Result<(RequestHead, HttpResponse), PipelineError> {
    let shared = upgrade(pipeline)?;
    let mut hops = 0usize;

    loop {
        let head = RequestHead::from(&request);
        let replay = request.try_clone();
        debug!(method = %head.method, url = %head.url, hop = hops, "Dispatching request");

        let response = shared.transport.execute(request).await?;
        if !response.is_redirect() {
            return Ok((head, response));
        }

        let Some(next) = replay.and_then(|previous| next_hop(previous, &response)) else {
            return Ok((head, response));
        };
        if hops >= shared.max_redirects {
            warn!(max = shared.max_redirects, url = %next.url(), "Redirect limit exceeded");
            return Err(TransportError::new(
                TransportErrorKind::TooManyRedirects,
                format!("more than {} redirects", shared.max_redirects),
            )
            .with_url(next.url().clone())
            .into());
        }
        let Some(next) = shared.redirects.decide(request_id, &response, next) else {
            return Ok((head, response));
        };

        hops += 1;
        info!(status = response.status.as_u16(), to = %next.url(), hop = hops, "Following redirect");
        request = next;
    }
}
