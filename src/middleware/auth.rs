use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::state::AppState;

/// Bearer token check for the protected API routes.
///
/// Only active when `auth.enabled` is set and a token is configured. Browsers
/// cannot attach headers to an `EventSource`, so `?token=` is accepted as well.
pub async fn auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, AppError> {
    let Some(expected) = state.config.auth.required_token() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| query_token(req.uri().query()));

    match provided {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(next.run(req).await),
        Some(_) => Err(AppError::Unauthorized("Invalid token".to_string())),
        None => Err(AppError::Unauthorized("Missing bearer token".to_string())),
    }
}

fn query_token(query: Option<&str>) -> Option<String> {
    query?.split('&').find_map(|pair| pair.strip_prefix("token=")).filter(|t| !t.is_empty()).map(str::to_string)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}
