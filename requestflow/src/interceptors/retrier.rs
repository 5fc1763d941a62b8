//! Retriers and the ordered chain consulted after a failed attempt.

use super::backoff::FallbackRetryPolicy;
use crate::errors::{PipelineError, TransportErrorKind};
use crate::task::{AsyncTask, CancelGuard, SubTaskKind, TaskEntry, TaskId, TaskRegistry};
use crate::transport::RequestHead;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Decision of a single retrier.
#[derive(Debug, Clone)]
pub enum RetryDirective {
    /// Defer to the next retrier.
    EvaluateNext,
    /// Retry the request after the delay (zero means immediately).
    RetryAfter(Duration),
    /// Give up, with the given error or a generic one.
    Fail(Option<PipelineError>),
}

/// What a retrier knows about the failed attempt.
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// The logical request.
    pub request_id: TaskId,
    /// The request as last dispatched, if it got that far.
    pub request: Option<RequestHead>,
    /// The failure.
    pub error: PipelineError,
    /// Attempts made so far (1 after the first failure).
    pub attempt: u32,
}

/// A step deciding whether a failed request should be retried.
pub trait Retrier: Send + Sync {
    /// Name used in logs, errors and the task registry.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Decides what to do about the failure in `ctx`.
    fn retry(&self, ctx: RetryContext) -> AsyncTask<RetryDirective>;
}

impl<F> Retrier for F
where
    F: Fn(RetryContext) -> AsyncTask<RetryDirective> + Send + Sync,
{
    fn name(&self) -> &str {
        "closure"
    }

    fn retry(&self, ctx: RetryContext) -> AsyncTask<RetryDirective> {
        self(ctx)
    }
}

/// Retries transport failures of the given kinds up to a fixed number of times.
#[derive(Debug, Clone)]
pub struct RetryOn {
    kinds: Vec<TransportErrorKind>,
    max_attempts: u32,
    delay: Duration,
}

impl RetryOn {
    /// Retries the given kinds up to `max_attempts` total attempts.
    #[must_use]
    pub fn new(kinds: impl IntoIterator<Item = TransportErrorKind>, max_attempts: u32) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    /// Retries timeouts and connection failures.
    #[must_use]
    pub fn network_blips(max_attempts: u32) -> Self {
        Self::new([TransportErrorKind::Timeout, TransportErrorKind::Connect], max_attempts)
    }

    /// Sets the delay before each retry.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Retrier for RetryOn {
    fn name(&self) -> &str {
        "retry_on"
    }

    fn retry(&self, ctx: RetryContext) -> AsyncTask<RetryDirective> {
        let matches = ctx
            .error
            .as_transport()
            .is_some_and(|err| self.kinds.contains(&err.kind));
        let directive = if matches && ctx.attempt < self.max_attempts {
            RetryDirective::RetryAfter(self.delay)
        } else {
            RetryDirective::EvaluateNext
        };
        AsyncTask::ready(directive)
    }
}

/// Final decision of the retrier chain plus fallback policy.
#[derive(Debug)]
pub enum RetryOutcome {
    /// Retry after the delay.
    Retry(Duration),
    /// Stop with this error.
    Fail(PipelineError),
}

/// Append-only ordered list of retriers backed by a fallback policy.
pub struct RetrierChain {
    retriers: RwLock<Vec<Arc<dyn Retrier>>>,
    fallback: FallbackRetryPolicy,
}

impl RetrierChain {
    /// Creates a new empty chain.
    #[must_use]
    pub fn new(fallback: FallbackRetryPolicy) -> Self {
        Self {
            retriers: RwLock::new(Vec::new()),
            fallback,
        }
    }

    /// Appends a retrier.
    pub fn push(&self, retrier: Arc<dyn Retrier>) {
        self.retriers.write().push(retrier);
    }

    /// Returns the number of retriers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.retriers.read().len()
    }

    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.retriers.read().is_empty()
    }

    /// Returns the fallback policy.
    #[must_use]
    pub const fn fallback(&self) -> &FallbackRetryPolicy {
        &self.fallback
    }

    /// Decides whether the failure in `ctx` is retried.
    ///
    /// Cancellations and errors that are not retry-eligible fail immediately
    /// without consulting any retrier. When every retrier defers, transport
    /// failures fall through to the fallback policy, which has already granted
    /// `fallback_used` retries for this request.
    pub async fn evaluate(
        &self,
        registry: &Arc<TaskRegistry>,
        ctx: RetryContext,
        fallback_used: &mut u32,
    ) -> RetryOutcome {
        if ctx.error.is_cancellation() {
            debug!("Request cancelled, not retrying");
            return RetryOutcome::Fail(ctx.error);
        }
        if !ctx.error.is_retry_eligible() {
            return RetryOutcome::Fail(ctx.error);
        }

        let retriers = self.retriers.read().clone();
        for retrier in retriers {
            let name = retrier.name().to_string();
            let task = retrier.retry(ctx.clone());
            let _registration = registry.register(TaskEntry::new(
                task.id(),
                ctx.request_id,
                SubTaskKind::Retrier,
                name.clone(),
            ));
            let guard = CancelGuard::new(task.handle());
            let result = task.await;
            guard.disarm();

            match result {
                Ok(RetryDirective::EvaluateNext) => {
                    debug!(retrier = %name, "Retrier deferred");
                }
                Ok(RetryDirective::RetryAfter(delay)) => {
                    info!(retrier = %name, delay_ms = delay.as_millis() as u64, attempt = ctx.attempt, "Retrier scheduled retry");
                    return RetryOutcome::Retry(delay);
                }
                Ok(RetryDirective::Fail(error)) => {
                    debug!(retrier = %name, "Retrier failed request");
                    return RetryOutcome::Fail(error.unwrap_or_else(|| PipelineError::RetryAborted {
                        retrier: name,
                        cause: Box::new(ctx.error),
                    }));
                }
                Err(error) => return RetryOutcome::Fail(error),
            }
        }

        if !ctx.error.is_fallback_eligible() {
            return RetryOutcome::Fail(ctx.error);
        }

        match self.fallback.next_delay(*fallback_used) {
            Some(delay) => {
                *fallback_used += 1;
                info!(retry = *fallback_used, max = self.fallback.max_retries(), delay_ms = delay.as_millis() as u64, "Fallback retry scheduled");
                RetryOutcome::Retry(delay)
            }
            None => RetryOutcome::Fail(PipelineError::RetryExhausted {
                attempts: ctx.attempt,
                last: Box::new(ctx.error),
            }),
        }
    }
}

impl std::fmt::Debug for RetrierChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrierChain")
            .field("len", &self.len())
            .field("fallback", &self.fallback)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AdaptationError, TransportError, ValidationError};
    use crate::interceptors::FallbackRetryConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chain(max_retries: u32) -> RetrierChain {
        RetrierChain::new(FallbackRetryPolicy::new(
            FallbackRetryConfig::new()
                .with_max_retries(max_retries)
                .with_base_delay_ms(0),
        ))
    }

    fn ctx(error: PipelineError, attempt: u32) -> RetryContext {
        RetryContext {
            request_id: TaskId::new(),
            request: None,
            error,
            attempt,
        }
    }

    fn connect_error() -> PipelineError {
        TransportError::new(TransportErrorKind::Connect, "refused").into()
    }

    fn counting(counter: Arc<AtomicUsize>, directive: RetryDirective) -> Arc<dyn Retrier> {
        Arc::new(move |_ctx: RetryContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            AsyncTask::ready(directive.clone())
        })
    }

    #[tokio::test]
    async fn test_cancellation_bypasses_chain() {
        let chain = chain(3);
        let calls = Arc::new(AtomicUsize::new(0));
        chain.push(counting(calls.clone(), RetryDirective::RetryAfter(Duration::ZERO)));

        let registry = Arc::new(TaskRegistry::new());
        let mut used = 0;
        let outcome = chain
            .evaluate(&registry, ctx(PipelineError::cancelled(None), 1), &mut used)
            .await;

        assert!(matches!(outcome, RetryOutcome::Fail(ref e) if e.is_cancellation()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_adaptation_errors_never_consult_chain() {
        let chain = chain(3);
        let calls = Arc::new(AtomicUsize::new(0));
        chain.push(counting(calls.clone(), RetryDirective::RetryAfter(Duration::ZERO)));

        let registry = Arc::new(TaskRegistry::new());
        let mut used = 0;
        let outcome = chain
            .evaluate(&registry, ctx(AdaptationError::OwnerReleased.into(), 1), &mut used)
            .await;

        assert!(matches!(outcome, RetryOutcome::Fail(PipelineError::Adaptation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_decisive_retrier_wins() {
        let chain = chain(3);
        let deferring = Arc::new(AtomicUsize::new(0));
        let deciding = Arc::new(AtomicUsize::new(0));
        let unreached = Arc::new(AtomicUsize::new(0));
        chain.push(counting(deferring.clone(), RetryDirective::EvaluateNext));
        chain.push(counting(deciding.clone(), RetryDirective::RetryAfter(Duration::from_millis(5))));
        chain.push(counting(unreached.clone(), RetryDirective::Fail(None)));

        let registry = Arc::new(TaskRegistry::new());
        let mut used = 0;
        let outcome = chain.evaluate(&registry, ctx(connect_error(), 1), &mut used).await;

        assert!(matches!(outcome, RetryOutcome::Retry(d) if d == Duration::from_millis(5)));
        assert_eq!(deferring.load(Ordering::SeqCst), 1);
        assert_eq!(deciding.load(Ordering::SeqCst), 1);
        assert_eq!(unreached.load(Ordering::SeqCst), 0);
        assert_eq!(used, 0);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_fail_without_error_is_generic_abort() {
        let chain = chain(3);
        chain.push(counting(Arc::new(AtomicUsize::new(0)), RetryDirective::Fail(None)));

        let registry = Arc::new(TaskRegistry::new());
        let mut used = 0;
        let outcome = chain.evaluate(&registry, ctx(connect_error(), 1), &mut used).await;
        assert!(matches!(outcome, RetryOutcome::Fail(PipelineError::RetryAborted { .. })));
    }

    #[tokio::test]
    async fn test_fallback_is_bounded() {
        let chain = chain(2);
        let registry = Arc::new(TaskRegistry::new());
        let mut used = 0;

        for attempt in 1..=2 {
            let outcome = chain.evaluate(&registry, ctx(connect_error(), attempt), &mut used).await;
            assert!(matches!(outcome, RetryOutcome::Retry(_)));
        }
        let outcome = chain.evaluate(&registry, ctx(connect_error(), 3), &mut used).await;
        assert!(matches!(outcome, RetryOutcome::Fail(PipelineError::RetryExhausted { attempts: 3, .. })));
        assert_eq!(used, 2);
    }

    #[tokio::test]
    async fn test_validation_errors_skip_fallback() {
        let chain = chain(3);
        let registry = Arc::new(TaskRegistry::new());
        let mut used = 0;
        let error: PipelineError = ValidationError::AuthenticationRequired { status: 401 }.into();

        let outcome = chain.evaluate(&registry, ctx(error, 1), &mut used).await;
        assert!(matches!(outcome, RetryOutcome::Fail(PipelineError::Validation(_))));
        assert_eq!(used, 0);
    }

    #[tokio::test]
    async fn test_retry_on_respects_kind_and_attempts() {
        let retrier = RetryOn::network_blips(2);
        let first = retrier.retry(ctx(connect_error(), 1)).await;
        assert!(matches!(first, Ok(RetryDirective::RetryAfter(_))));

        let exhausted = retrier.retry(ctx(connect_error(), 2)).await;
        assert!(matches!(exhausted, Ok(RetryDirective::EvaluateNext)));

        let other: PipelineError = TransportError::new(TransportErrorKind::Body, "eof").into();
        let skipped = retrier.retry(ctx(other, 1)).await;
        assert!(matches!(skipped, Ok(RetryDirective::EvaluateNext)));
    }
}
