use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

const MAX_PATH_LENGTH: usize = 4096;

/// Early rejection of malformed requests.
///
/// - path traversal sequences in the URI (plain or percent-encoded) -> 400
/// - a declared `Content-Length` above `server.max_body_bytes` -> 413
/// - scanner user agents are logged, not blocked
pub async fn validate_request_middleware(State(cfg): State<Arc<AppConfig>>, req: Request, next: Next) -> Response {
    if contains_path_traversal(req.uri().path()) {
        tracing::warn!("Rejected traversal attempt: {}", sanitize_for_logging(req.uri().path()));
        return AppError::InvalidInput("Path traversal detected in request".to_string()).into_response();
    }

    if let Some(ua) = req.headers().get("user-agent").and_then(|v| v.to_str().ok()) {
        if is_suspicious_user_agent(ua) {
            tracing::warn!("Suspicious user agent detected: {}", sanitize_for_logging(ua));
        }
    }

    if matches!(*req.method(), Method::POST | Method::PUT | Method::DELETE) {
        let declared = req
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        let max_body = cfg.server.max_body_bytes;
        if declared.is_some_and(|len| len > max_body) {
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({
                    "error": {
                        "code": "PAYLOAD_TOO_LARGE",
                        "message": format!("Request body exceeds maximum size of {} bytes", max_body),
                    },
                    "status": 413,
                })),
            )
                .into_response();
        }
    }

    next.run(req).await
}

/// Detects `..` traversal, `/./` segments and their percent-encoded forms.
pub fn contains_path_traversal(path: &str) -> bool {
    if path.contains('\0') {
        return true;
    }
    if path.split(['/', '\\']).any(|segment| segment == "..") {
        return true;
    }
    if path.contains("/./") || path.contains("\\.\\") {
        return true;
    }

    let lower = path.to_lowercase();
    const ENCODED: [&str; 8] = ["%2e%2e", "%252e%252e", "%2e/", "/%2e", "%2f%2e", "%2e%5c", "%5c%2e", "%00"];
    ENCODED.iter().any(|p| lower.contains(p))
}

fn is_suspicious_user_agent(ua: &str) -> bool {
    let ua = ua.to_lowercase();
    ["scanner", "nikto", "sqlmap", "havij", "acunetix"].iter().any(|s| ua.contains(s))
        || (ua.contains("crawler") && !ua.contains("googlebot") && !ua.contains("bingbot"))
}

/// Checks a path taken from a request body or query string.
pub fn validate_request_path(field: &str, path: &str) -> AppResult<()> {
    crate::error::validation::require_field(path, field)?;
    if contains_path_traversal(path) {
        return Err(AppError::InvalidInput(format!("Invalid path: {}", sanitize_for_logging(path))));
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(AppError::ValidationError {
            field: field.to_string(),
            message: format!("Path exceeds maximum length of {} characters", MAX_PATH_LENGTH),
        });
    }
    Ok(())
}

/// Strips control characters, escapes quotes and caps the length for log output.
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .take(200)
        .collect::<String>()
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
}
