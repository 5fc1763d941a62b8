//! The network seam the pipeline dispatches requests through.
//!
//! Transports execute exactly one HTTP exchange per call and never follow
//! redirects themselves; the pipeline's redirect policy drives every hop.

mod reqwest_transport;

pub use reqwest_transport::ReqwestTransport;

use crate::errors::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE, LOCATION};
use reqwest::{Method, Request, StatusCode, Url};

/// Protocol for executing a single HTTP exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and reads the full response body.
    async fn execute(&self, request: Request) -> Result<HttpResponse, TransportError>;
}

/// The parts of a request that survive dispatch, used by validators,
/// retriers and redirect handlers.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// HTTP method.
    pub method: Method,
    /// Request URL.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
}

impl From<&Request> for RequestHead {
    fn from(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            url: request.url().clone(),
            headers: request.headers().clone(),
        }
    }
}

/// A fully-read HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// URL that produced this response.
    pub url: Url,
    /// Response body.
    pub body: Bytes,
}

impl HttpResponse {
    /// Creates a response with no headers.
    #[must_use]
    pub fn new(status: StatusCode, url: Url, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            url,
            body: body.into(),
        }
    }

    /// Whether the status is a redirect.
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        self.status.is_redirection()
    }

    /// Whether the status is 2xx.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// The `Content-Type` header, if present and readable.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    /// The `Location` header resolved against the response URL.
    #[must_use]
    pub fn location(&self) -> Option<Url> {
        let raw = self.headers.get(LOCATION)?.to_str().ok()?;
        self.url.join(raw).ok()
    }

    /// The body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn body_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
