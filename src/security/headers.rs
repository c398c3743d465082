//! Header manipulation for forwarded HTTP requests.
//!
//! # Responsibilities
//! - Strip every client-supplied variant of the reserved identity headers
//! - Inject the resolved caller identity under the canonical names
//! - Replace X-Forwarded-Proto, X-Forwarded-Host, X-Forwarded-For
//! - Strip hop-by-hop headers, keeping a protocol upgrade when one is
//!   negotiated
//!
//! # Design Decisions
//! - Header names are compared after lower-casing and mapping `_` to `-`,
//!   since some stacks treat `Tailscale_User_Login` as `Tailscale-User-Login`
//! - Never trust existing X-Forwarded-* or identity headers from clients

use std::net::SocketAddr;

use axum::http::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE,
    TRAILER, TRANSFER_ENCODING, UPGRADE,
};

use crate::overlay::CallerIdentity;

pub const USER_LOGIN: HeaderName = HeaderName::from_static("tailscale-user-login");
pub const USER_NAME: HeaderName = HeaderName::from_static("tailscale-user-name");
pub const USER_PROFILE_PIC: HeaderName = HeaderName::from_static("tailscale-user-profile-pic");
pub const HEADERS_INFO: HeaderName = HeaderName::from_static("tailscale-headers-info");

/// Where the meaning of the identity headers is documented.
pub const HEADERS_INFO_URL: &str = "https://tailscale.com/s/serve-headers";

pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers the proxy alone is allowed to set, in injection order.
pub const RESERVED_HEADERS: [HeaderName; 4] =
    [USER_LOGIN, USER_NAME, USER_PROFILE_PIC, HEADERS_INFO];

const FORWARDING_HEADERS: [HeaderName; 3] = [X_FORWARDED_PROTO, X_FORWARDED_HOST, X_FORWARDED_FOR];

/// Lower-case a header name and map underscores to hyphens.
pub fn normalize_header_name(name: &str) -> String {
    name.chars()
        .map(|c| if c == '_' { '-' } else { c.to_ascii_lowercase() })
        .collect()
}

fn matches_any(name: &HeaderName, targets: &[HeaderName]) -> bool {
    let normalized = normalize_header_name(name.as_str());
    targets.iter().any(|t| t.as_str() == normalized)
}

/// Remove every header whose normalized name matches one of `targets`.
///
/// Returns the number of distinct header names removed.
fn remove_variants(headers: &mut HeaderMap, targets: &[HeaderName]) -> usize {
    let doomed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| matches_any(name, targets))
        .cloned()
        .collect();
    for name in &doomed {
        headers.remove(name);
    }
    doomed.len()
}

/// Delete all variants of the reserved identity headers.
pub fn sanitize_reserved(headers: &mut HeaderMap) -> usize {
    remove_variants(headers, &RESERVED_HEADERS)
}

/// Set every reserved header from the resolved identity.
pub fn inject_identity(headers: &mut HeaderMap, identity: &CallerIdentity) {
    headers.insert(USER_LOGIN, encode_header_value(&identity.login_name));
    headers.insert(USER_NAME, encode_header_value(&identity.display_name));
    headers.insert(USER_PROFILE_PIC, encode_header_value(&identity.profile_pic_url));
    headers.insert(HEADERS_INFO, HeaderValue::from_static(HEADERS_INFO_URL));
}

/// Sanitize then inject, leaving exactly one server-set value per reserved header.
pub fn apply_identity(headers: &mut HeaderMap, identity: &CallerIdentity) {
    let removed = sanitize_reserved(headers);
    if removed > 0 {
        tracing::warn!(
            removed,
            login = %identity.login_name,
            "Dropped client-supplied identity headers"
        );
    }
    inject_identity(headers, identity);
}

/// Replace the forwarding metadata with values the proxy vouches for.
pub fn rewrite_forwarding(
    headers: &mut HeaderMap,
    encrypted: bool,
    canonical_host: &str,
    peer: SocketAddr,
) {
    remove_variants(headers, &FORWARDING_HEADERS);

    let proto = if encrypted { "https" } else { "http" };
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));
    headers.insert(X_FORWARDED_HOST, encode_header_value(canonical_host));
    headers.insert(X_FORWARDED_FOR, encode_header_value(&peer.ip().to_string()));
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }

    for name in [
        CONNECTION,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-connection"),
        PROXY_AUTHENTICATE,
        PROXY_AUTHORIZATION,
        TE,
        TRAILER,
        TRANSFER_ENCODING,
        UPGRADE,
    ] {
        headers.remove(name);
    }
}

/// The protocol named by `Upgrade`, when `Connection` asks for an upgrade.
pub fn upgrade_protocol(headers: &HeaderMap) -> Option<HeaderValue> {
    let requested = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
    if requested {
        headers.get(UPGRADE).cloned()
    } else {
        None
    }
}

/// Put back the upgrade headers after `strip_hop_by_hop`.
pub fn restore_upgrade(headers: &mut HeaderMap, protocol: HeaderValue) {
    headers.insert(CONNECTION, HeaderValue::from_static("upgrade"));
    headers.insert(UPGRADE, protocol);
}

/// Make a header value from arbitrary text.
///
/// Printable ASCII passes through; anything else becomes an RFC 2047
/// `=?utf-8?q?...?=` encoded word.
pub fn encode_header_value(value: &str) -> HeaderValue {
    let printable = value.bytes().all(|b| (0x20..0x7f).contains(&b));
    let text = if printable {
        value.to_string()
    } else {
        q_encode(value)
    };
    HeaderValue::from_str(&text).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn q_encode(value: &str) -> String {
    let mut out = String::from("=?utf-8?q?");
    for b in value.bytes() {
        match b {
            b' ' => out.push('_'),
            b'a'..=b'z'
            | b'A'..=b'Z'
            | b'0'..=b'9'
            | b'!'
            | b'*'
            | b'+'
            | b'-'
            | b'/'
            | b'.'
            | b'@' => out.push(b as char),
            _ => out.push_str(&format!("={:02X}", b)),
        }
    }
    out.push_str("?=");
    out
}
