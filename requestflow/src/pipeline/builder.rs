//! Request builder: the caller-facing façade over a pipeline.
//!
//! A builder describes one logical request. Each terminal operation returns
//! its own lazy [`AsyncTask`]; nothing is constructed, adapted or sent until
//! that task is first driven, and every attempt reconstructs the request from
//! its source.

use super::execution::{execute, PipelineShared};
use crate::decode;
use crate::errors::{AdaptationError, PipelineError, PipelineOrigin};
use crate::redirect::RedirectHandler;
use crate::task::{AsyncTask, TaskId};
use crate::transport::HttpResponse;
use bytes::Bytes;
use encoding_rs::Encoding;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Method, Request, Url};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::{Arc, Weak};

#[cfg(feature = "document")]
use crate::decode::Document;

const BROWSING_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const DEFAULT_LANGUAGE: &str = "en-us";

/// Header defaults applied to a request unless it already carries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestHandling {
    /// No defaults.
    #[default]
    None,
    /// Page navigation: HTML `Accept` and `Accept-Language`.
    Browsing,
    /// Background call: `X-Requested-With: XMLHttpRequest` and `Accept-Language`.
    Ajax,
}

impl RequestHandling {
    /// Sets the defaults of this directive on `headers` where absent.
    pub fn apply(self, headers: &mut HeaderMap) {
        match self {
            Self::None => {}
            Self::Browsing => {
                headers
                    .entry(ACCEPT)
                    .or_insert(HeaderValue::from_static(BROWSING_ACCEPT));
                headers
                    .entry(ACCEPT_LANGUAGE)
                    .or_insert(HeaderValue::from_static(DEFAULT_LANGUAGE));
            }
            Self::Ajax => {
                headers
                    .entry(HeaderName::from_static("x-requested-with"))
                    .or_insert(HeaderValue::from_static("XMLHttpRequest"));
                headers
                    .entry(ACCEPT_LANGUAGE)
                    .or_insert(HeaderValue::from_static(DEFAULT_LANGUAGE));
            }
        }
    }
}

/// Values a request can be built from.
pub trait IntoRequest {
    /// Builds the request.
    fn into_request(self) -> Result<Request, PipelineError>;
}

fn parse_url(raw: &str) -> Result<Url, PipelineError> {
    Url::parse(raw).map_err(|e| AdaptationError::InvalidRequest(format!("{raw}: {e}")).into())
}

impl IntoRequest for Request {
    fn into_request(self) -> Result<Request, PipelineError> {
        Ok(self)
    }
}

impl IntoRequest for Url {
    fn into_request(self) -> Result<Request, PipelineError> {
        Ok(Request::new(Method::GET, self))
    }
}

impl IntoRequest for &str {
    fn into_request(self) -> Result<Request, PipelineError> {
        parse_url(self).map(|url| Request::new(Method::GET, url))
    }
}

impl IntoRequest for String {
    fn into_request(self) -> Result<Request, PipelineError> {
        self.as_str().into_request()
    }
}

impl IntoRequest for (Method, Url) {
    fn into_request(self) -> Result<Request, PipelineError> {
        Ok(Request::new(self.0, self.1))
    }
}

impl IntoRequest for (Method, &str) {
    fn into_request(self) -> Result<Request, PipelineError> {
        parse_url(self.1).map(|url| Request::new(self.0, url))
    }
}

impl IntoRequest for (Method, String) {
    fn into_request(self) -> Result<Request, PipelineError> {
        (self.0, self.1.as_str()).into_request()
    }
}

type Constructor = Arc<dyn Fn() -> Result<Request, PipelineError> + Send + Sync>;
type Observer = Arc<dyn Fn(&HttpResponse) + Send + Sync>;

/// Where each attempt gets its request from.
#[derive(Clone)]
pub(crate) enum RequestSource {
    /// Called once per attempt.
    Deferred(Constructor),
    /// Cloned once per attempt.
    Template(Arc<Mutex<Request>>),
    /// Conversion failed; every terminal fails with this error.
    Invalid(PipelineError),
}

impl RequestSource {
    pub(crate) fn from_value(value: impl IntoRequest) -> Self {
        match value.into_request() {
            Ok(request) => Self::Template(Arc::new(Mutex::new(request))),
            Err(error) => Self::Invalid(error),
        }
    }

    pub(crate) fn construct(&self) -> Result<Request, PipelineError> {
        match self {
            Self::Deferred(constructor) => constructor(),
            Self::Template(template) => template.lock().try_clone().ok_or_else(|| {
                AdaptationError::InvalidRequest("streaming request body cannot be replayed".to_string())
                    .into()
            }),
            Self::Invalid(error) => Err(error.clone()),
        }
    }
}

/// Everything a terminal operation needs besides the pipeline.
#[derive(Clone)]
pub(crate) struct PendingRequest {
    pub(crate) source: RequestSource,
    pub(crate) handling: RequestHandling,
    pub(crate) observer: Option<Observer>,
    pub(crate) redirect: Option<Arc<dyn RedirectHandler>>,
}

impl PendingRequest {
    const fn new(source: RequestSource) -> Self {
        Self {
            source,
            handling: RequestHandling::None,
            observer: None,
            redirect: None,
        }
    }
}

/// Builds and issues one logical request through a pipeline.
///
/// `on_response`, `on_redirect` and `handling` return a modified copy and
/// leave the original untouched.
#[derive(Clone)]
pub struct RequestBuilder {
    pipeline: Weak<PipelineShared>,
    origin: PipelineOrigin,
    pending: PendingRequest,
}

impl RequestBuilder {
    pub(crate) fn new(pipeline: &Arc<PipelineShared>, source: RequestSource) -> Self {
        Self {
            pipeline: Arc::downgrade(pipeline),
            origin: pipeline.origin.clone(),
            pending: PendingRequest::new(source),
        }
    }

    pub(crate) fn deferred<F>(pipeline: &Arc<PipelineShared>, constructor: F) -> Self
    where
        F: Fn() -> Result<Request, PipelineError> + Send + Sync + 'static,
    {
        Self::new(pipeline, RequestSource::Deferred(Arc::new(constructor)))
    }

    /// Returns a copy that calls `observer` with the final response of every
    /// attempt, before validation.
    #[must_use]
    pub fn on_response<F>(&self, observer: F) -> Self
    where
        F: Fn(&HttpResponse) + Send + Sync + 'static,
    {
        let mut next = self.clone();
        next.pending.observer = Some(Arc::new(observer));
        next
    }

    /// Returns a copy whose redirects are decided by `handler`.
    #[must_use]
    pub fn on_redirect<H>(&self, handler: H) -> Self
    where
        H: RedirectHandler + 'static,
    {
        let mut next = self.clone();
        next.pending.redirect = Some(Arc::new(handler));
        next
    }

    /// Returns a copy with the given header defaults.
    #[must_use]
    pub fn handling(&self, handling: RequestHandling) -> Self {
        let mut next = self.clone();
        next.pending.handling = handling;
        next
    }

    fn terminal<T, F>(&self, decode: F) -> AsyncTask<T>
    where
        T: Send + 'static,
        F: FnOnce(HttpResponse) -> Result<T, PipelineError> + Send + 'static,
    {
        let request_id = TaskId::new();
        let pipeline = self.pipeline.clone();
        let origin = self.origin.clone();
        let pending = self.pending.clone();
        AsyncTask::from_future_with_id(request_id, async move {
            let response = execute(pipeline, origin, request_id, pending).await?;
            decode(response)
        })
    }

    /// The final response, undecoded.
    #[must_use]
    pub fn response(&self) -> AsyncTask<HttpResponse> {
        self.terminal(Ok)
    }

    /// The response body.
    #[must_use]
    pub fn bytes(&self) -> AsyncTask<Bytes> {
        self.terminal(|response| Ok(response.body))
    }

    /// The body decoded with its declared charset, UTF-8 if none.
    #[must_use]
    pub fn text(&self) -> AsyncTask<String> {
        self.terminal(|response| Ok(decode::response_text(&response)?))
    }

    /// The body decoded with a fixed encoding.
    #[must_use]
    pub fn text_with_encoding(&self, encoding: &'static Encoding) -> AsyncTask<String> {
        self.terminal(move |response| Ok(decode::decode_text(&response.body, encoding)?))
    }

    /// The body parsed as an HTML document.
    #[cfg(feature = "document")]
    #[must_use]
    pub fn document(&self) -> AsyncTask<Document> {
        self.terminal(|response| {
            let html = decode::response_text(&response)?;
            Ok(Document::new(response.url, html))
        })
    }

    /// The body parsed as any JSON value.
    #[must_use]
    pub fn json(&self) -> AsyncTask<Value> {
        self.terminal(|response| Ok(decode::json_value(&response.body)?))
    }

    /// The body parsed as a JSON object.
    #[must_use]
    pub fn json_object(&self) -> AsyncTask<Map<String, Value>> {
        self.terminal(|response| Ok(decode::json_object(&response.body)?))
    }

    /// The body deserialized into `T`.
    #[must_use]
    pub fn decoded<T>(&self) -> AsyncTask<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.terminal(|response| Ok(decode::typed(&response.body)?))
    }

    /// The body converted by a caller-supplied decoder.
    #[must_use]
    pub fn decoded_with<T, F>(&self, decoder: F) -> AsyncTask<T>
    where
        T: Send + 'static,
        F: FnOnce(&[u8]) -> anyhow::Result<T> + Send + 'static,
    {
        self.terminal(move |response| Ok(decode::with_decoder(&response.body, decoder)?))
    }

    /// Completes once the request succeeds, discarding the body.
    #[must_use]
    pub fn no_payload(&self) -> AsyncTask<()> {
        self.terminal(|_| Ok(()))
    }
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("origin", &self.origin)
            .field("handling", &self.pending.handling)
            .field("observer", &self.pending.observer.is_some())
            .field("redirect", &self.pending.redirect.is_some())
            .finish_non_exhaustive()
    }
}
