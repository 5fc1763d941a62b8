//! Request adapters and the ordered chain that evaluates them.

use crate::errors::{AdaptationError, ConfigError, PipelineError};
use crate::task::{AsyncTask, CancelGuard, SubTaskKind, TaskEntry, TaskId, TaskRegistry};
use parking_lot::RwLock;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Request;
use std::sync::Arc;
use tracing::debug;

/// Outcome of a single adapter evaluation.
#[derive(Debug)]
pub enum AdapterResult {
    /// Hand the request to the next adapter.
    EvaluateNext(Request),
    /// Dispatch this request without consulting the remaining adapters.
    InterceptAndUse(Request),
    /// Abort the whole request.
    Fail(Option<PipelineError>),
}

/// A step that mutates an outbound request before dispatch.
pub trait RequestAdapter: Send + Sync {
    /// Name used in logs, errors and the task registry.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Adapts `request`.
    fn adapt(&self, request: Request) -> AsyncTask<AdapterResult>;
}

impl<F> RequestAdapter for F
where
    F: Fn(Request) -> AsyncTask<AdapterResult> + Send + Sync,
{
    fn name(&self) -> &str {
        "closure"
    }

    fn adapt(&self, request: Request) -> AsyncTask<AdapterResult> {
        self(request)
    }
}

/// Sets a header on every request, replacing any existing value.
#[derive(Debug, Clone)]
pub struct HeaderAdapter {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderAdapter {
    /// Creates an adapter setting `name: value`.
    pub fn new(name: &str, value: &str) -> Result<Self, ConfigError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ConfigError::InvalidHeader(name.to_string()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| ConfigError::InvalidHeader(name.to_string()))?;
        Ok(Self { name, value })
    }
}

impl RequestAdapter for HeaderAdapter {
    fn name(&self) -> &str {
        "header"
    }

    fn adapt(&self, mut request: Request) -> AsyncTask<AdapterResult> {
        request
            .headers_mut()
            .insert(self.name.clone(), self.value.clone());
        AsyncTask::ready(AdapterResult::EvaluateNext(request))
    }
}

/// Append-only ordered list of adapters.
#[derive(Default)]
pub struct AdapterChain {
    adapters: RwLock<Vec<Arc<dyn RequestAdapter>>>,
}

impl AdapterChain {
    /// Creates a new empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an adapter.
    pub fn push(&self, adapter: Arc<dyn RequestAdapter>) {
        self.adapters.write().push(adapter);
    }

    /// Returns the number of adapters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    /// Returns true if the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.read().is_empty()
    }

    /// Runs the adapters in registration order.
    ///
    /// Each adapter's task stays registered in `registry` until it settles or
    /// is dropped.
    pub async fn evaluate(
        &self,
        registry: &Arc<TaskRegistry>,
        request_id: TaskId,
        mut request: Request,
    ) -> Result<Request, PipelineError> {
        let adapters = self.adapters.read().clone();

        for adapter in adapters {
            let name = adapter.name().to_string();
            let task = adapter.adapt(request);
            let _registration = registry.register(TaskEntry::new(
                task.id(),
                request_id,
                SubTaskKind::Adapter,
                name.clone(),
            ));
            let guard = CancelGuard::new(task.handle());
            let result = task.await;
            guard.disarm();

            match result {
                Ok(AdapterResult::EvaluateNext(next)) => {
                    debug!(adapter = %name, "Adapter passed request on");
                    request = next;
                }
                Ok(AdapterResult::InterceptAndUse(next)) => {
                    debug!(adapter = %name, "Adapter intercepted request");
                    return Ok(next);
                }
                Ok(AdapterResult::Fail(error)) => {
                    debug!(adapter = %name, "Adapter failed request");
                    return Err(adaptation_failure(name, error));
                }
                Err(error) => return Err(adaptation_failure(name, Some(error))),
            }
        }

        Ok(request)
    }
}

fn adaptation_failure(adapter: String, error: Option<PipelineError>) -> PipelineError {
    match error {
        None => AdaptationError::Rejected { adapter }.into(),
        Some(error @ PipelineError::Adaptation(_)) => error,
        Some(error) => AdaptationError::Failed {
            adapter,
            cause: Box::new(error),
        }
        .into(),
    }
}

impl std::fmt::Debug for AdapterChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterChain")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::{Method, Url};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> Request {
        let url = Url::parse("https://site.test/").unwrap_or_else(|e| panic!("{e}"));
        Request::new(Method::GET, url)
    }

    struct Marker {
        mark: &'static str,
        calls: AtomicUsize,
        intercept: bool,
    }

    impl Marker {
        fn new(mark: &'static str, intercept: bool) -> Arc<Self> {
            Arc::new(Self {
                mark,
                calls: AtomicUsize::new(0),
                intercept,
            })
        }
    }

    impl RequestAdapter for Marker {
        fn name(&self) -> &str {
            self.mark
        }

        fn adapt(&self, mut request: Request) -> AsyncTask<AdapterResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let trail = request
                .headers()
                .get("x-trail")
                .and_then(|v| v.to_str().ok())
                .map_or_else(|| self.mark.to_string(), |t| format!("{t},{}", self.mark));
            if let Ok(value) = HeaderValue::from_str(&trail) {
                request.headers_mut().insert("x-trail", value);
            }
            let intercept = self.intercept;
            AsyncTask::from_future(async move {
                tokio::task::yield_now().await;
                Ok(if intercept {
                    AdapterResult::InterceptAndUse(request)
                } else {
                    AdapterResult::EvaluateNext(request)
                })
            })
        }
    }

    fn trail(request: &Request) -> Option<String> {
        request
            .headers()
            .get("x-trail")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    #[tokio::test]
    async fn test_chain_creation() {
        let chain = AdapterChain::new();
        assert!(chain.is_empty());
    }

    #[tokio::test]
    async fn test_chain_applies_in_order() {
        let chain = AdapterChain::new();
        for mark in ["a", "b", "c"] {
            chain.push(Marker::new(mark, false));
        }

        let registry = Arc::new(TaskRegistry::new());
        let adapted = chain.evaluate(&registry, TaskId::new(), request()).await;
        let adapted = adapted.unwrap_or_else(|e| panic!("chain failed: {e}"));

        assert_eq!(trail(&adapted), Some("a,b,c".to_string()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_chain_short_circuit() {
        let chain = AdapterChain::new();
        let first = Marker::new("a", false);
        let interceptor = Marker::new("b", true);
        let skipped = Marker::new("c", false);
        chain.push(first.clone());
        chain.push(interceptor.clone());
        chain.push(skipped.clone());

        let registry = Arc::new(TaskRegistry::new());
        let adapted = chain.evaluate(&registry, TaskId::new(), request()).await;

        assert_eq!(adapted.ok().as_ref().and_then(trail), Some("a,b".to_string()));
        assert_eq!(interceptor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(skipped.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fail_without_error_is_rejection() {
        let chain = AdapterChain::new();
        chain.push(Arc::new(|_req: Request| {
            AsyncTask::ready(AdapterResult::Fail(None))
        }));

        let registry = Arc::new(TaskRegistry::new());
        let result = chain.evaluate(&registry, TaskId::new(), request()).await;
        assert!(matches!(
            result,
            Err(PipelineError::Adaptation(AdaptationError::Rejected { ref adapter })) if adapter == "closure"
        ));
    }

    #[tokio::test]
    async fn test_header_adapter_sets_header() {
        let chain = AdapterChain::new();
        let adapter = HeaderAdapter::new("X-Foo", "1").unwrap_or_else(|e| panic!("{e}"));
        chain.push(Arc::new(adapter));

        let registry = Arc::new(TaskRegistry::new());
        let adapted = chain
            .evaluate(&registry, TaskId::new(), request())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(adapted.headers().get("x-foo").map(HeaderValue::as_bytes), Some(&b"1"[..]));
    }

    #[test]
    fn test_header_adapter_rejects_invalid_name() {
        assert!(HeaderAdapter::new("bad header", "1").is_err());
    }
}
