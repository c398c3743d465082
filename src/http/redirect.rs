//! Canonical-host redirects.
//!
//! Requests that name the node by anything other than its canonical
//! hostname (a short name, a stale alias) are sent to the canonical one so
//! cookies and TLS certificates line up.

use axum::{
    http::{header::LOCATION, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
};

/// Strip an optional `:port` suffix, including from bracketed IPv6 literals.
pub fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.bytes().all(|b| b.is_ascii_digit()) => {
            name
        }
        _ => host,
    }
}

/// Build the redirect target for `uri` on `canonical`.
pub fn redirect_location(uri: &Uri, canonical: &str, encrypted: bool) -> String {
    let scheme = if encrypted { "https" } else { "http" };
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    format!("{scheme}://{canonical}{path}")
}

/// Return a 301 to the canonical host when the request names another host.
///
/// Hosts compare case-insensitively with the port ignored. A request with no
/// host, or a node with no canonical name, is never redirected.
pub fn canonical_redirect(
    host: Option<&str>,
    uri: &Uri,
    canonical: &str,
    encrypted: bool,
) -> Option<Response> {
    let host = strip_port(host?.trim());
    if host.is_empty() || canonical.is_empty() || host.eq_ignore_ascii_case(canonical) {
        return None;
    }

    let location = redirect_location(uri, canonical, encrypted);
    let value = HeaderValue::from_str(&location).ok()?;
    tracing::debug!(from = %host, location = %location, "Redirecting to canonical host");
    Some((StatusCode::MOVED_PERMANENTLY, [(LOCATION, value)]).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: &str = "node.tail1234.ts.net";

    fn location(response: &Response) -> &str {
        response.headers()[LOCATION].to_str().unwrap()
    }

    #[test]
    fn strips_ports() {
        assert_eq!(strip_port("node:8080"), "node");
        assert_eq!(strip_port("node"), "node");
        assert_eq!(strip_port("[fd7a::1]:443"), "fd7a::1");
        assert_eq!(strip_port("fd7a::1"), "fd7a::1");
    }

    #[test]
    fn short_name_redirects_over_http() {
        let uri: Uri = "/a/b?x=1".parse().unwrap();
        let response = canonical_redirect(Some("node"), &uri, CANONICAL, false).unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(location(&response), "http://node.tail1234.ts.net/a/b?x=1");
    }

    #[test]
    fn encrypted_redirect_uses_https() {
        let uri: Uri = "/".parse().unwrap();
        let response = canonical_redirect(Some("node:443"), &uri, CANONICAL, true).unwrap();
        assert_eq!(location(&response), "https://node.tail1234.ts.net/");
    }

    #[test]
    fn canonical_host_is_not_redirected() {
        let uri: Uri = "/x".parse().unwrap();
        let host = Some("NODE.tail1234.ts.net:80");
        assert!(canonical_redirect(host, &uri, CANONICAL, false).is_none());
        assert!(canonical_redirect(Some(CANONICAL), &uri, CANONICAL, true).is_none());
    }

    #[test]
    fn missing_host_is_not_redirected() {
        let uri: Uri = "/x".parse().unwrap();
        assert!(canonical_redirect(None, &uri, CANONICAL, false).is_none());
        assert!(canonical_redirect(Some(""), &uri, CANONICAL, false).is_none());
        assert!(canonical_redirect(Some("node"), &uri, "", false).is_none());
    }
}
