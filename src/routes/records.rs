use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;

use crate::{
    error::{validation::require_field, AppError, AppResult, OptionExt},
    metadata::{CacheOutcome, MetadataError},
    middleware::validation::sanitize_for_logging,
    state::AppState,
    types::{FileDetail, TmdbCacheUpsert},
};

#[derive(Debug, Default, Deserialize)]
pub struct DetailParams {
    pub path: Option<String>,
    pub prefix: Option<String>,
}

pub async fn get_file_details(
    State(state): State<AppState>,
    Query(params): Query<DetailParams>,
) -> AppResult<Response> {
    if let Some(path) = params.path.filter(|p| !p.is_empty()) {
        let detail = state.store.file_detail(&path).await?.ok_or_not_found("File detail")?;
        return Ok(Json(detail).into_response());
    }
    if let Some(prefix) = params.prefix.filter(|p| !p.is_empty()) {
        let details = state.store.file_details_with_prefix(&prefix).await?;
        return Ok(Json(details).into_response());
    }
    Err(AppError::BadRequest("Either path or prefix is required".into()))
}

pub async fn upsert_file_details(
    State(state): State<AppState>,
    Json(detail): Json<FileDetail>,
) -> AppResult<StatusCode> {
    require_field(&detail.path, "path")?;
    state.store.upsert_file_detail(&detail).await?;
    Ok(StatusCode::OK)
}

pub async fn delete_file_details(
    State(state): State<AppState>,
    Query(params): Query<DetailParams>,
) -> AppResult<StatusCode> {
    let path = params.path.unwrap_or_default();
    if path.is_empty() {
        return Err(AppError::BadRequest("path is required".into()));
    }
    let removed = state.store.delete_file_detail(&path).await?;
    tracing::debug!("Removed {} file detail rows for {}", removed, sanitize_for_logging(&path));
    Ok(StatusCode::OK)
}

#[derive(Debug, Default, Deserialize)]
pub struct CacheParams {
    pub query: Option<String>,
}

/// Read-through lookup. The body is the stored record verbatim; `X-TMDB-Cache`
/// reports `HIT`, `HIT-SECONDARY` or `MISS`.
pub async fn get_tmdb_cache(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<CacheParams>,
) -> AppResult<Response> {
    let key = params.query.unwrap_or_default();
    if key.is_empty() {
        return Err(AppError::BadRequest("query parameter is required".into()));
    }
    let authorization = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok());

    let outcome = match state.metadata.resolve(&key, authorization).await {
        Ok(outcome) => outcome,
        Err(MetadataError::Store(e)) => return Err(e.into()),
        Err(e) => {
            state.metrics.inc_metadata_upstream();
            tracing::debug!("Metadata lookup for {} failed: {}", sanitize_for_logging(&key), e);
            return Err(AppError::NotFound("Not found in cache or TMDB".into()));
        }
    };
    if matches!(outcome, CacheOutcome::Miss(_)) {
        state.metrics.inc_metadata_upstream();
    }

    let status = outcome.header_value();
    let mut response = outcome.into_body().into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(HeaderName::from_static("x-tmdb-cache"), HeaderValue::from_static(status));
    Ok(response)
}

pub async fn upsert_tmdb_cache(
    State(state): State<AppState>,
    Json(body): Json<TmdbCacheUpsert>,
) -> AppResult<StatusCode> {
    if body.query.is_empty() || body.result.is_empty() {
        return Err(AppError::BadRequest("query and result are required".into()));
    }
    state.metadata.upsert(&body.query, &body.result).await?;
    Ok(StatusCode::OK)
}

pub async fn clear_tmdb_cache(State(state): State<AppState>) -> AppResult<StatusCode> {
    let removed = state.metadata.clear().await?;
    tracing::info!("Cleared {} metadata cache entries", removed);
    Ok(StatusCode::OK)
}
