//! Security and caching headers for every API response.

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::config::AppConfig;

/// Streaming content types that must reach the client unbuffered.
const STREAM_TYPES: [&str; 2] = ["text/event-stream", "application/x-ndjson"];

/// Adds the baseline security headers and a no-store policy for JSON and
/// streaming responses.
///
/// - `X-Content-Type-Options: nosniff`
/// - `X-Frame-Options: SAMEORIGIN`
/// - `Referrer-Policy: no-referrer`
/// - `Cross-Origin-Resource-Policy: same-origin`
/// - optional HSTS and CSP from the `[security]` section
///
/// Streams additionally get `X-Accel-Buffering: no` so reverse proxies forward
/// each event as soon as it is written.
pub async fn security_headers_middleware(State(cfg): State<Arc<AppConfig>>, req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();

    headers.insert(HeaderName::from_static("x-content-type-options"), HeaderValue::from_static("nosniff"));
    headers.insert(HeaderName::from_static("x-frame-options"), HeaderValue::from_static("SAMEORIGIN"));
    headers.insert(HeaderName::from_static("referrer-policy"), HeaderValue::from_static("no-referrer"));
    headers.insert(
        HeaderName::from_static("cross-origin-resource-policy"),
        HeaderValue::from_static("same-origin"),
    );

    if let Some(sec) = cfg.security.as_ref() {
        if sec.enable_hsts.unwrap_or(false) {
            let max_age = sec.hsts_max_age.unwrap_or(31_536_000);
            let include_sub = if sec.hsts_include_subdomains.unwrap_or(false) { "; includeSubDomains" } else { "" };
            if let Ok(val) = HeaderValue::from_str(&format!("max-age={}{}", max_age, include_sub)) {
                headers.insert(HeaderName::from_static("strict-transport-security"), val);
            }
        }
        if let Some(csp) = sec.csp.as_deref().filter(|c| !c.trim().is_empty()) {
            if let Ok(val) = HeaderValue::from_str(csp) {
                headers.insert(HeaderName::from_static("content-security-policy"), val);
            }
        }
    }

    apply_cache_policy(headers);
    res
}

fn apply_cache_policy(headers: &mut HeaderMap) {
    let content_type = match headers.get(CONTENT_TYPE).map(|ct| ct.to_str()) {
        Some(Ok(s)) => s.to_string(),
        Some(Err(e)) => {
            tracing::warn!("Invalid UTF-8 in Content-Type header: {}", e);
            return;
        }
        None => return,
    };
    let is_stream = STREAM_TYPES.iter().any(|t| content_type.starts_with(t));
    if is_stream || content_type.starts_with("application/json") {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    }
    if is_stream {
        headers.insert(HeaderName::from_static("x-accel-buffering"), HeaderValue::from_static("no"));
    }
}

/// Whether a response body is a long-lived stream that must not be compressed.
pub fn is_stream_content_type(value: &str) -> bool {
    STREAM_TYPES.iter().any(|t| value.starts_with(t))
}
