//! Transport backed by a `reqwest` client.

use super::{HttpResponse, Transport};
use crate::errors::{ConfigError, TransportError};
use async_trait::async_trait;
use reqwest::redirect::Policy;
use reqwest::{Client, Request};
use std::time::Duration;
use tracing::debug;

/// Executes requests with `reqwest`, with automatic redirects disabled.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Builds a client with the given per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wraps an existing client.
    ///
    /// The client should be built with `redirect(Policy::none())`, otherwise
    /// it follows redirects before the pipeline's redirect policy sees them.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: Request) -> Result<HttpResponse, TransportError> {
        let method = request.method().clone();
        let url = request.url().clone();

        let response = self
            .client
            .execute(request)
            .await
            .map_err(|e| TransportError::from_reqwest(&e).with_url(url.clone()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let final_url = response.url().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::from_reqwest(&e).with_url(url))?;

        debug!(%method, url = %final_url, status = status.as_u16(), bytes = body.len(), "Transport exchange complete");

        Ok(HttpResponse {
            status,
            headers,
            url: final_url,
            body,
        })
    }
}
