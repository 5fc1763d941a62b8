//! Scripted transport for tests.

use crate::errors::{TransportError, TransportErrorKind};
use crate::transport::{HttpResponse, RequestHead, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LOCATION};
use reqwest::{Request, StatusCode};
use std::collections::VecDeque;
use std::time::Duration;

/// A canned response, completed with the request URL when served.
#[derive(Debug, Clone)]
pub struct MockResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl MockResponse {
    /// Creates an empty response with `status`.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Adds a header. Invalid names or values are ignored.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

#[derive(Debug)]
enum Scripted {
    Respond(MockResponse),
    Fail(TransportErrorKind, String),
    Delay(Duration, MockResponse),
    Pending,
}

/// A [`Transport`] replaying a script.
///
/// Each call takes the next scripted step. Once the script runs out, every
/// call answers `200 OK` with an empty body. All requests are recorded.
#[derive(Debug, Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<RequestHead>>,
    bodies: Mutex<Vec<Option<Bytes>>>,
}

impl MockTransport {
    /// Creates a transport with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push(&self, response: MockResponse) -> &Self {
        self.script.lock().push_back(Scripted::Respond(response));
        self
    }

    /// Queues a response with a status and body.
    pub fn push_response(&self, status: StatusCode, body: impl Into<Bytes>) -> &Self {
        self.push(MockResponse::new(status).with_body(body))
    }

    /// Queues a redirect to `location`.
    pub fn push_redirect(&self, status: StatusCode, location: &str) -> &Self {
        self.push(MockResponse::new(status).with_header(LOCATION.as_str(), location))
    }

    /// Queues a transport failure.
    pub fn push_error(&self, kind: TransportErrorKind, message: impl Into<String>) -> &Self {
        self.script
            .lock()
            .push_back(Scripted::Fail(kind, message.into()));
        self
    }

    /// Queues a response delivered after `delay`.
    pub fn push_delayed(&self, delay: Duration, response: MockResponse) -> &Self {
        self.script
            .lock()
            .push_back(Scripted::Delay(delay, response));
        self
    }

    /// Queues a call that never completes.
    pub fn push_pending(&self) -> &Self {
        self.script.lock().push_back(Scripted::Pending);
        self
    }

    /// Number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request received, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<RequestHead> {
        self.requests.lock().clone()
    }

    /// The buffered body of every request received, in order.
    #[must_use]
    pub fn bodies(&self) -> Vec<Option<Bytes>> {
        self.bodies.lock().clone()
    }

    /// Number of scripted steps not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

fn serve(response: MockResponse, request: &Request) -> HttpResponse {
    HttpResponse {
        status: response.status,
        headers: response.headers,
        url: request.url().clone(),
        body: response.body,
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: Request) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(RequestHead::from(&request));
        self.bodies.lock().push(
            request
                .body()
                .and_then(reqwest::Body::as_bytes)
                .map(Bytes::copy_from_slice),
        );

        let step = self.script.lock().pop_front();
        match step {
            None => Ok(serve(MockResponse::new(StatusCode::OK), &request)),
            Some(Scripted::Respond(response)) => Ok(serve(response, &request)),
            Some(Scripted::Fail(kind, message)) => {
                Err(TransportError::new(kind, message).with_url(request.url().clone()))
            }
            Some(Scripted::Delay(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(serve(response, &request))
            }
            Some(Scripted::Pending) => std::future::pending().await,
        }
    }
}
