//! Construction of the request for the next redirect hop.

use crate::transport::HttpResponse;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, PROXY_AUTHORIZATION};
use reqwest::{Method, Request, StatusCode, Url};
use tracing::debug;

/// Builds the request that follows `response`, starting from the request
/// that produced it.
///
/// Returns `None` if the response is not a followable redirect. 303, and
/// 301/302 for anything but GET and HEAD, switch to a bodiless GET. 307 and
/// 308 keep method and body. Insecure locations are upgraded to `https`
/// before hosts are compared, and credentials are dropped when the host
/// changes.
pub fn next_hop(mut previous: Request, response: &HttpResponse) -> Option<Request> {
    let mut location = response.location()?;

    let switch_to_get = match response.status {
        StatusCode::SEE_OTHER => previous.method() != Method::HEAD,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => {
            previous.method() != Method::GET && previous.method() != Method::HEAD
        }
        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT => false,
        _ => return None,
    };

    if switch_to_get {
        *previous.method_mut() = Method::GET;
        *previous.body_mut() = None;
        let headers = previous.headers_mut();
        headers.remove(CONTENT_TYPE);
        headers.remove(CONTENT_LENGTH);
    }

    if upgrade_insecure(&mut location) {
        debug!(to = %location, "Upgrading insecure redirect");
    }
    if !same_host(previous.url(), &location) {
        let headers = previous.headers_mut();
        headers.remove(AUTHORIZATION);
        headers.remove(PROXY_AUTHORIZATION);
        headers.remove(COOKIE);
    }

    *previous.url_mut() = location;
    Some(previous)
}

/// Switches an `http` url to `https`. Returns true if the url changed.
pub(crate) fn upgrade_insecure(url: &mut Url) -> bool {
    url.scheme() == "http" && url.set_scheme("https").is_ok()
}

fn same_host(a: &Url, b: &Url) -> bool {
    a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, LOCATION};

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap_or_else(|e| panic!("{e}"))
    }

    fn redirect(status: StatusCode, location: &'static str) -> HttpResponse {
        let mut response = HttpResponse::new(status, url("https://site.test/form"), "");
        response.headers.insert(LOCATION, HeaderValue::from_static(location));
        response
    }

    fn post() -> Request {
        let mut request = Request::new(Method::POST, url("https://site.test/form"));
        *request.body_mut() = Some("a=1".into());
        request
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/x-www-form-urlencoded"));
        request
            .headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        request
    }

    #[test]
    fn test_insecure_same_host_keeps_credentials() {
        let next = next_hop(post(), &redirect(StatusCode::TEMPORARY_REDIRECT, "http://site.test/form2"));
        let next = next.unwrap_or_else(|| panic!("307 should be followed"));
        assert_eq!(next.url().as_str(), "https://site.test/form2");
        assert!(next.headers().contains_key(AUTHORIZATION));
    }

    #[test]
    fn test_insecure_other_host_drops_credentials() {
        let next = next_hop(post(), &redirect(StatusCode::TEMPORARY_REDIRECT, "http://other.test/form"));
        let next = next.unwrap_or_else(|| panic!("307 should be followed"));
        assert_eq!(next.url().as_str(), "https://other.test/form");
        assert!(!next.headers().contains_key(AUTHORIZATION));
    }

    #[test]
    fn test_see_other_switches_to_get() {
        let next = next_hop(post(), &redirect(StatusCode::SEE_OTHER, "/done"));
        let next = next.unwrap_or_else(|| panic!("303 should be followed"));
        assert_eq!(next.method(), Method::GET);
        assert!(next.body().is_none());
        assert!(next.headers().get(CONTENT_TYPE).is_none());
        assert_eq!(next.url().as_str(), "https://site.test/done");
    }

    #[test]
    fn test_temporary_redirect_preserves_method_and_body() {
        let next = next_hop(post(), &redirect(StatusCode::TEMPORARY_REDIRECT, "/again"));
        let next = next.unwrap_or_else(|| panic!("307 should be followed"));
        assert_eq!(next.method(), Method::POST);
        assert!(next.body().is_some());
    }

    #[test]
    fn test_found_keeps_get() {
        let request = Request::new(Method::GET, url("https://site.test/a"));
        let next = next_hop(request, &redirect(StatusCode::FOUND, "/b"));
        assert_eq!(next.map(|r| r.method().clone()), Some(Method::GET));
    }

    #[test]
    fn test_cross_host_drops_credentials() {
        let next = next_hop(post(), &redirect(StatusCode::PERMANENT_REDIRECT, "https://other.test/form"));
        let next = next.unwrap_or_else(|| panic!("308 should be followed"));
        assert!(next.headers().get(AUTHORIZATION).is_none());

        let same = next_hop(post(), &redirect(StatusCode::PERMANENT_REDIRECT, "/form2"));
        assert!(same.is_some_and(|r| r.headers().get(AUTHORIZATION).is_some()));
    }

    #[test]
    fn test_not_modified_is_not_followed() {
        let request = Request::new(Method::GET, url("https://site.test/a"));
        assert!(next_hop(request, &redirect(StatusCode::NOT_MODIFIED, "/b")).is_none());
    }
}
