//! Client address resolution
//!
//! The first X-Forwarded-For entry wins when the header is present;
//! otherwise the socket peer address is used. IPv4-mapped IPv6 peers
//! (`::ffff:a.b.c.d`) are reported as plain IPv4 so they can be masked.

use axum::http::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::net::IpAddr;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Reported when a request carries no User-Agent header
pub const UNKNOWN_USER_AGENT: &str = "Unknown";

/// Resolve the client address for a request
///
/// # Arguments
/// * `headers` - HTTP request headers
/// * `peer` - The socket remote address (fallback)
pub fn client_ip(headers: &HeaderMap, peer: IpAddr) -> String {
    forwarded_for(headers).unwrap_or_else(|| peer.to_canonical().to_string())
}

/// First hop of X-Forwarded-For, trimmed. Values are not parsed as
/// addresses; whatever the proxy sent is kept.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let xff = header_text(headers.get(X_FORWARDED_FOR)?);
    if xff.is_empty() {
        return None;
    }

    xff.split(',').next().map(|first| first.trim().to_string())
}

/// User-Agent header value, or [`UNKNOWN_USER_AGENT`] when absent
pub fn user_agent(headers: &HeaderMap) -> String {
    headers
        .get(USER_AGENT)
        .map(header_text)
        .unwrap_or_else(|| UNKNOWN_USER_AGENT.to_string())
}

/// Header bytes as text. Non-ASCII bytes are decoded as UTF-8, with invalid
/// sequences replaced rather than dropping the whole value.
fn header_text(value: &HeaderValue) -> String {
    String::from_utf8_lossy(value.as_bytes()).into_owned()
}
