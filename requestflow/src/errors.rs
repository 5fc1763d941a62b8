//! Error types for the request pipeline.
//!
//! Every terminal operation surfaces exactly one [`PipelineError`]. The
//! variants follow the pipeline stage that produced them, which also decides
//! whether the Retrier Chain may look at the failure.

use reqwest::Url;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Identity of the pipeline that issued a request, attached to transport
/// errors for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOrigin {
    /// Unique pipeline id.
    pub id: Uuid,
    /// Human-readable label from the configuration.
    pub label: Arc<str>,
}

impl PipelineOrigin {
    /// Creates a new origin with a fresh id.
    #[must_use]
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
        }
    }
}

impl fmt::Display for PipelineOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}

/// The main error type for pipeline operations.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The request never reached the transport.
    #[error(transparent)]
    Adaptation(#[from] AdaptationError),

    /// The underlying network call failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The transport succeeded but a validator rejected the response.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The payload could not be converted to the requested representation.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Every retrier deferred and the fallback policy ran out of attempts.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Number of transport attempts made.
        attempts: u32,
        /// The failure of the final attempt.
        last: Box<PipelineError>,
    },

    /// A retrier failed the request without supplying its own error.
    #[error("retrier '{retrier}' aborted the request: {cause}")]
    RetryAborted {
        /// Name of the retrier.
        retrier: String,
        /// The failure that was being evaluated.
        cause: Box<PipelineError>,
    },

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Creates the error reported for a cancelled task.
    #[must_use]
    pub fn cancelled(reason: Option<String>) -> Self {
        Self::Transport(TransportError::new(
            TransportErrorKind::Cancelled,
            reason.unwrap_or_else(|| "cancelled".to_string()),
        ))
    }

    /// Returns true if this error reports an explicit cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Transport(err) => err.kind == TransportErrorKind::Cancelled,
            Self::Adaptation(AdaptationError::Failed { cause, .. }) => cause.is_cancellation(),
            _ => false,
        }
    }

    /// Returns true if the Retrier Chain may be consulted for this error.
    #[must_use]
    pub fn is_retry_eligible(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Validation(_)) && !self.is_cancellation()
    }

    /// Returns true if the fallback retry policy applies to this error.
    ///
    /// Redirect loops are not transient, so overflowing the redirect limit is
    /// excluded along with cancellation.
    #[must_use]
    pub fn is_fallback_eligible(&self) -> bool {
        match self {
            Self::Transport(err) => !matches!(
                err.kind,
                TransportErrorKind::Cancelled | TransportErrorKind::TooManyRedirects
            ),
            _ => false,
        }
    }

    /// Returns the validation error, if this is one.
    #[must_use]
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            Self::Validation(err) => Some(err),
            _ => None,
        }
    }

    /// Returns the transport error, if this is one.
    #[must_use]
    pub fn as_transport(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }

    /// Tags transport failures with the pipeline that issued them.
    #[must_use]
    pub fn with_origin(self, origin: &PipelineOrigin) -> Self {
        match self {
            Self::Transport(err) => Self::Transport(err.with_origin(origin.clone())),
            Self::RetryExhausted { attempts, last } => Self::RetryExhausted {
                attempts,
                last: Box::new(last.with_origin(origin)),
            },
            other => other,
        }
    }
}

/// Failures before the request reaches the transport.
#[derive(Debug, Clone, Error)]
pub enum AdaptationError {
    /// An adapter failed without supplying its own error.
    #[error("adapter '{adapter}' rejected the request")]
    Rejected {
        /// Name of the adapter.
        adapter: String,
    },

    /// An adapter failed with an error.
    #[error("adapter '{adapter}' failed: {cause}")]
    Failed {
        /// Name of the adapter.
        adapter: String,
        /// The error the adapter reported.
        cause: Box<PipelineError>,
    },

    /// The owning pipeline was dropped while the request was in flight.
    #[error("owning pipeline was released before the request completed")]
    OwnerReleased,

    /// The request could not be constructed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The credential collaborator refused to authorize the request.
    #[error("credential injection failed: {0}")]
    Credentials(String),
}

/// Category of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// The request or connection timed out.
    Timeout,
    /// The connection could not be established.
    Connect,
    /// The request was cancelled.
    Cancelled,
    /// The redirect limit was exceeded.
    TooManyRedirects,
    /// The response body could not be read.
    Body,
    /// The request could not be sent.
    Request,
    /// Any other transport failure.
    Other,
}

impl TransportErrorKind {
    /// Returns the kind as a static string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Cancelled => "cancelled",
            Self::TooManyRedirects => "too_many_redirects",
            Self::Body => "body",
            Self::Request => "request",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed network call, unwrapped to its underlying cause.
#[derive(Debug, Clone, Error)]
#[error("transport {kind} error: {message}")]
pub struct TransportError {
    /// The failure category.
    pub kind: TransportErrorKind,
    /// Message of the innermost cause.
    pub message: String,
    /// The URL being requested, when known.
    pub url: Option<Url>,
    /// The pipeline that issued the request.
    pub origin: Option<PipelineOrigin>,
}

impl TransportError {
    /// Creates a new transport error.
    #[must_use]
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            url: None,
            origin: None,
        }
    }

    /// Sets the URL.
    #[must_use]
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Sets the originating pipeline.
    #[must_use]
    pub fn with_origin(mut self, origin: PipelineOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Converts a reqwest error, keeping only the innermost cause message.
    #[must_use]
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else if err.is_redirect() {
            TransportErrorKind::TooManyRedirects
        } else if err.is_request() {
            TransportErrorKind::Request
        } else {
            TransportErrorKind::Other
        };

        let mut error = Self::new(kind, root_cause(err));
        error.url = err.url().cloned();
        error
    }
}

fn root_cause(err: &(dyn std::error::Error + 'static)) -> String {
    let mut current = err;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

/// Semantic failures detected on a successful transport response.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    /// The response is an anti-automation challenge page.
    #[error("anti-bot challenge required at {url}: {marker}")]
    ChallengeRequired {
        /// The URL that served (or pointed to) the challenge.
        url: Url,
        /// What identified the challenge.
        marker: String,
    },

    /// The session is missing, expired or invalid.
    #[error("authentication required (HTTP {status})")]
    AuthenticationRequired {
        /// Response status code.
        status: u16,
    },

    /// The status code is outside the accepted range.
    #[error("unacceptable status code {status}")]
    UnacceptableStatus {
        /// Response status code.
        status: u16,
    },

    /// A custom validator rejected the response.
    #[error("validator '{validator}' rejected the response: {reason}")]
    Rejected {
        /// Name of the validator.
        validator: String,
        /// Why the response was rejected.
        reason: String,
    },
}

/// The payload could not be converted to the requested type.
#[derive(Debug, Clone, Error)]
#[error("failed to decode response as {target}: {message}")]
pub struct DecodeError {
    /// The requested representation.
    pub target: &'static str,
    /// Why decoding failed.
    pub message: String,
}

impl DecodeError {
    /// Creates a new decode error.
    #[must_use]
    pub fn new(target: &'static str, message: impl Into<String>) -> Self {
        Self {
            target,
            message: message.into(),
        }
    }
}

/// Errors raised while building a pipeline or loading its configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A challenge body pattern is not a valid regex.
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Regex compiler message.
        message: String,
    },

    /// A configured header name or value is invalid.
    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),

    /// The tracing subscriber could not be installed.
    #[error("tracing setup failed: {0}")]
    Tracing(String),

    /// The configuration could not be parsed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_not_retry_eligible() {
        let err = PipelineError::cancelled(Some("user".to_string()));
        assert!(err.is_cancellation());
        assert!(!err.is_retry_eligible());
        assert!(!err.is_fallback_eligible());
    }

    #[test]
    fn test_eligibility_by_kind() {
        let transport: PipelineError =
            TransportError::new(TransportErrorKind::Connect, "refused").into();
        assert!(transport.is_retry_eligible());
        assert!(transport.is_fallback_eligible());

        let validation: PipelineError = ValidationError::AuthenticationRequired { status: 401 }.into();
        assert!(validation.is_retry_eligible());
        assert!(!validation.is_fallback_eligible());

        let looping: PipelineError =
            TransportError::new(TransportErrorKind::TooManyRedirects, "loop").into();
        assert!(looping.is_retry_eligible());
        assert!(!looping.is_fallback_eligible());

        let adaptation: PipelineError = AdaptationError::OwnerReleased.into();
        assert!(!adaptation.is_retry_eligible());

        let decode: PipelineError = DecodeError::new("json", "eof").into();
        assert!(!decode.is_retry_eligible());
    }

    #[test]
    fn test_with_origin_tags_transport_errors() {
        let origin = PipelineOrigin::new("site");
        let err: PipelineError = TransportError::new(TransportErrorKind::Timeout, "slow").into();
        let tagged = err.with_origin(&origin);
        assert_eq!(tagged.as_transport().and_then(|t| t.origin.clone()), Some(origin.clone()));

        let exhausted = PipelineError::RetryExhausted {
            attempts: 4,
            last: Box::new(TransportError::new(TransportErrorKind::Connect, "down").into()),
        }
        .with_origin(&origin);
        match exhausted {
            PipelineError::RetryExhausted { last, .. } => {
                assert_eq!(last.as_transport().and_then(|t| t.origin.clone()), Some(origin));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_root_cause_unwraps_sources() {
        #[derive(Debug, Error)]
        #[error("outer")]
        struct Outer(#[source] std::io::Error);

        let err = Outer(std::io::Error::new(std::io::ErrorKind::Other, "socket closed"));
        assert_eq!(root_cause(&err), "socket closed");
    }
}
