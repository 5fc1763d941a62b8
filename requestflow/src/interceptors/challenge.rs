//! Anti-automation (WAF) challenge detection.
//!
//! Challenge check paths rotate in real deployments, so every signature here
//! is configuration data.

use super::Validator;
use crate::errors::{ConfigError, ValidationError};
use crate::transport::{HttpResponse, RequestHead};
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};

/// Signatures of an anti-automation challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeConfig {
    /// Path prefixes of challenge-check endpoints. Redirects to these are
    /// never followed.
    #[serde(default = "default_check_paths")]
    pub check_paths: Vec<String>,
    /// Regexes matched against the body of responses with a challenge status.
    #[serde(default = "default_body_patterns")]
    pub body_patterns: Vec<String>,
    /// Status codes challenge pages are served with.
    #[serde(default = "default_status_codes")]
    pub status_codes: Vec<u16>,
    /// Header whose value `challenge` marks a challenge regardless of body.
    #[serde(default = "default_mitigation_header")]
    pub mitigation_header: Option<String>,
}

fn default_check_paths() -> Vec<String> {
    vec!["/cdn-cgi/l/chk_jschl".to_string()]
}

fn default_body_patterns() -> Vec<String> {
    vec![
        r"cf-browser-verification".to_string(),
        r"/cdn-cgi/challenge-platform/".to_string(),
        r"jschl[-_]vc".to_string(),
        r"<title>\s*Just a moment\.\.\.\s*</title>".to_string(),
    ]
}

fn default_status_codes() -> Vec<u16> {
    vec![403, 429, 503]
}

#[allow(clippy::unnecessary_wraps)]
fn default_mitigation_header() -> Option<String> {
    Some("cf-mitigated".to_string())
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            check_paths: default_check_paths(),
            body_patterns: default_body_patterns(),
            status_codes: default_status_codes(),
            mitigation_header: default_mitigation_header(),
        }
    }
}

impl ChallengeConfig {
    /// Creates a config with the default signatures.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a challenge-check path prefix.
    #[must_use]
    pub fn with_check_path(mut self, path: impl Into<String>) -> Self {
        self.check_paths.push(path.into());
        self
    }

    /// Adds a body pattern.
    #[must_use]
    pub fn with_body_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.body_patterns.push(pattern.into());
        self
    }

    /// Returns true if `url` targets a challenge-check endpoint.
    #[must_use]
    pub fn is_check_path(&self, url: &Url) -> bool {
        let path = url.path();
        self.check_paths.iter().any(|p| path.starts_with(p.as_str()))
    }
}

/// Built-in validator detecting challenge pages and refused challenge redirects.
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    config: ChallengeConfig,
    patterns: Vec<Regex>,
}

impl ChallengeDetector {
    /// Compiles the body patterns of `config`.
    pub fn new(config: ChallengeConfig) -> Result<Self, ConfigError> {
        let patterns = config
            .body_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { config, patterns })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ChallengeConfig {
        &self.config
    }

    fn challenge(url: &Url, marker: impl Into<String>) -> ValidationError {
        ValidationError::ChallengeRequired {
            url: url.clone(),
            marker: marker.into(),
        }
    }
}

impl Validator for ChallengeDetector {
    fn name(&self) -> &str {
        "challenge_detector"
    }

    fn validate(&self, _request: &RequestHead, response: &HttpResponse) -> Result<(), ValidationError> {
        if self.config.is_check_path(&response.url) {
            return Err(Self::challenge(&response.url, "challenge check path"));
        }

        if response.is_redirect() {
            if let Some(location) = response.location() {
                if self.config.is_check_path(&location) {
                    return Err(Self::challenge(&location, "redirect to challenge check path"));
                }
            }
        }

        if let Some(header) = &self.config.mitigation_header {
            let mitigated = response
                .headers
                .get(header.as_str())
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.eq_ignore_ascii_case("challenge"));
            if mitigated {
                return Err(Self::challenge(&response.url, format!("{header} header")));
            }
        }

        if self.config.status_codes.contains(&response.status.as_u16()) {
            let body = response.body_lossy();
            if let Some(pattern) = self.patterns.iter().find(|p| p.is_match(&body)) {
                return Err(Self::challenge(&response.url, format!("body matched '{}'", pattern.as_str())));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, LOCATION};
    use reqwest::{Method, StatusCode};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap_or_else(|e| panic!("{e}"))
    }

    fn head() -> RequestHead {
        RequestHead {
            method: Method::GET,
            url: url("https://site.test/"),
            headers: HeaderMap::new(),
        }
    }

    fn detector() -> ChallengeDetector {
        ChallengeDetector::new(ChallengeConfig::default()).unwrap_or_else(|e| panic!("{e}"))
    }

    #[test]
    fn test_plain_page_passes() {
        let response = HttpResponse::new(StatusCode::OK, url("https://site.test/"), "<html>hello</html>");
        assert!(detector().validate(&head(), &response).is_ok());
    }

    #[test]
    fn test_challenge_body_detected() {
        let response = HttpResponse::new(
            StatusCode::SERVICE_UNAVAILABLE,
            url("https://site.test/"),
            r#"<html><form id="challenge-form" action="/cdn-cgi/l/chk_jschl"><input name="jschl_vc"></form></html>"#,
        );
        assert!(matches!(
            detector().validate(&head(), &response),
            Err(ValidationError::ChallengeRequired { .. })
        ));
    }

    #[test]
    fn test_redirect_to_check_path_detected() {
        let mut response = HttpResponse::new(StatusCode::FOUND, url("https://inner.test/"), "");
        response.headers.insert(
            LOCATION,
            HeaderValue::from_static("http://inner.test/cdn-cgi/l/chk_jschl?pass=1"),
        );
        assert!(detector().validate(&head(), &response).is_err());
    }

    #[test]
    fn test_mitigation_header_detected() {
        let mut response = HttpResponse::new(StatusCode::FORBIDDEN, url("https://site.test/"), "");
        response
            .headers
            .insert("cf-mitigated", HeaderValue::from_static("challenge"));
        assert!(detector().validate(&head(), &response).is_err());
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let config = ChallengeConfig::new().with_body_pattern("(unclosed");
        assert!(matches!(
            ChallengeDetector::new(config),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_custom_check_path() {
        let config = ChallengeConfig::new().with_check_path("/__verify");
        assert!(config.is_check_path(&url("https://site.test/__verify/step")));
        assert!(!config.is_check_path(&url("https://site.test/verify")));
    }
}
