//! Credential collaborator: injects authentication and recognises
//! responses that mean the session is no longer valid.

use crate::errors::{AdaptationError, PipelineError, ValidationError};
use crate::interceptors::Validator;
use crate::transport::{HttpResponse, RequestHead};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::RwLock;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Request, StatusCode};
use std::sync::Arc;

/// Supplies credentials for outbound requests.
///
/// Both methods run synchronously on the request path and must not block
/// for long.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialProvider: Send + Sync {
    /// Adds authentication to `request`.
    fn authorize(&self, request: &mut Request) -> Result<(), PipelineError>;

    /// Reports responses that imply an expired or invalid session.
    fn validate(&self, _request: &RequestHead, _response: &HttpResponse) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// A fixed `Authorization` header.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    header: HeaderValue,
}

impl StaticCredentials {
    /// Bearer token credentials.
    pub fn bearer(token: &str) -> Result<Self, PipelineError> {
        Self::from_value(&format!("Bearer {token}"))
    }

    /// HTTP basic credentials.
    pub fn basic(username: &str, password: &str) -> Result<Self, PipelineError> {
        let encoded = STANDARD.encode(format!("{username}:{password}"));
        Self::from_value(&format!("Basic {encoded}"))
    }

    fn from_value(value: &str) -> Result<Self, PipelineError> {
        let mut header = HeaderValue::from_str(value)
            .map_err(|e| AdaptationError::Credentials(e.to_string()))?;
        header.set_sensitive(true);
        Ok(Self { header })
    }
}

impl CredentialProvider for StaticCredentials {
    fn authorize(&self, request: &mut Request) -> Result<(), PipelineError> {
        request
            .headers_mut()
            .entry(AUTHORIZATION)
            .or_insert_with(|| self.header.clone());
        Ok(())
    }

    fn validate(&self, _request: &RequestHead, response: &HttpResponse) -> Result<(), ValidationError> {
        if response.status == StatusCode::UNAUTHORIZED {
            return Err(ValidationError::AuthenticationRequired {
                status: response.status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Shared, replaceable slot holding the pipeline's credential provider.
pub type CredentialSlot = Arc<RwLock<Option<Arc<dyn CredentialProvider>>>>;

/// Built-in validator delegating to whichever provider is in the slot.
pub struct CredentialValidator {
    slot: CredentialSlot,
}

impl CredentialValidator {
    /// Creates a validator reading from `slot`.
    #[must_use]
    pub const fn new(slot: CredentialSlot) -> Self {
        Self { slot }
    }
}

impl Validator for CredentialValidator {
    fn name(&self) -> &str {
        "credentials"
    }

    fn validate(&self, request: &RequestHead, response: &HttpResponse) -> Result<(), ValidationError> {
        let provider = self.slot.read().clone();
        provider.map_or(Ok(()), |provider| provider.validate(request, response))
    }
}
