//! Validators that turn transport successes into semantic failures.

use crate::errors::ValidationError;
use crate::transport::{HttpResponse, RequestHead};
use parking_lot::RwLock;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::debug;

/// A predicate over a completed exchange.
pub trait Validator: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Returns an error if the response must not be handed to the caller.
    fn validate(&self, request: &RequestHead, response: &HttpResponse) -> Result<(), ValidationError>;
}

impl<F> Validator for F
where
    F: Fn(&RequestHead, &HttpResponse) -> Result<(), ValidationError> + Send + Sync,
{
    fn name(&self) -> &str {
        "closure"
    }

    fn validate(&self, request: &RequestHead, response: &HttpResponse) -> Result<(), ValidationError> {
        self(request, response)
    }
}

/// Rejects responses whose status is outside an accepted range.
#[derive(Debug, Clone)]
pub struct StatusCodeValidator {
    accepted: RangeInclusive<u16>,
}

impl StatusCodeValidator {
    /// Accepts only statuses in `accepted`.
    #[must_use]
    pub const fn new(accepted: RangeInclusive<u16>) -> Self {
        Self { accepted }
    }

    /// Accepts 2xx statuses.
    #[must_use]
    pub const fn success() -> Self {
        Self::new(200..=299)
    }
}

impl Validator for StatusCodeValidator {
    fn name(&self) -> &str {
        "status_code"
    }

    fn validate(&self, _request: &RequestHead, response: &HttpResponse) -> Result<(), ValidationError> {
        let status = response.status.as_u16();
        if self.accepted.contains(&status) {
            Ok(())
        } else {
            Err(ValidationError::UnacceptableStatus { status })
        }
    }
}

/// Built-in validators followed by append-only user validators.
pub struct ValidatorChain {
    builtin: Vec<Arc<dyn Validator>>,
    validators: RwLock<Vec<Arc<dyn Validator>>>,
}

impl ValidatorChain {
    /// Creates a chain whose built-ins always run first.
    #[must_use]
    pub fn new(builtin: Vec<Arc<dyn Validator>>) -> Self {
        Self {
            builtin,
            validators: RwLock::new(Vec::new()),
        }
    }

    /// Appends a user validator.
    pub fn push(&self, validator: Arc<dyn Validator>) {
        self.validators.write().push(validator);
    }

    /// Returns the number of validators, built-ins included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.builtin.len() + self.validators.read().len()
    }

    /// Returns true if there are no validators at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every validator in order, stopping at the first failure.
    pub fn validate(&self, request: &RequestHead, response: &HttpResponse) -> Result<(), ValidationError> {
        let user = self.validators.read().clone();
        for validator in self.builtin.iter().chain(user.iter()) {
            if let Err(error) = validator.validate(request, response) {
                debug!(validator = validator.name(), %error, "Validator rejected response");
                return Err(error);
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ValidatorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorChain")
            .field("builtin", &self.builtin.len())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::{Method, StatusCode, Url};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn exchange(status: StatusCode) -> (RequestHead, HttpResponse) {
        let url = Url::parse("https://site.test/page").unwrap_or_else(|e| panic!("{e}"));
        let head = RequestHead {
            method: Method::GET,
            url: url.clone(),
            headers: reqwest::header::HeaderMap::new(),
        };
        (head, HttpResponse::new(status, url, "body"))
    }

    #[test]
    fn test_status_code_validator() {
        let validator = StatusCodeValidator::success();
        let (head, ok) = exchange(StatusCode::OK);
        assert!(validator.validate(&head, &ok).is_ok());

        let (head, missing) = exchange(StatusCode::NOT_FOUND);
        assert!(matches!(
            validator.validate(&head, &missing),
            Err(ValidationError::UnacceptableStatus { status: 404 })
        ));
    }

    #[test]
    fn test_first_failure_short_circuits() {
        let later_calls = Arc::new(AtomicUsize::new(0));
        let counter = later_calls.clone();

        let chain = ValidatorChain::new(vec![Arc::new(StatusCodeValidator::success())]);
        chain.push(Arc::new(move |_: &RequestHead, _: &HttpResponse| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        assert_eq!(chain.len(), 2);

        let (head, response) = exchange(StatusCode::INTERNAL_SERVER_ERROR);
        assert!(chain.validate(&head, &response).is_err());
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);

        let (head, response) = exchange(StatusCode::OK);
        assert!(chain.validate(&head, &response).is_ok());
        assert_eq!(later_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_custom_marker_validator() {
        let chain = ValidatorChain::new(Vec::new());
        chain.push(Arc::new(|_: &RequestHead, response: &HttpResponse| {
            if response.body_lossy().contains("body") {
                Err(ValidationError::Rejected {
                    validator: "marker".to_string(),
                    reason: "site error marker".to_string(),
                })
            } else {
                Ok(())
            }
        }));

        let (head, response) = exchange(StatusCode::OK);
        assert!(matches!(
            chain.validate(&head, &response),
            Err(ValidationError::Rejected { .. })
        ));
    }
}
