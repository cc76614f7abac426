use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tokio::task::spawn_blocking;

use crate::{
    error::{AppError, AppResult},
    library::{format_file_size, listing::ListQuery, source::SourceListing},
    middleware::validation::{sanitize_for_logging, validate_request_path},
    state::AppState,
    types::{DirectoryEntry, ReadlinkRequest, ReadlinkResponse},
};

/// Query string shared by the listing endpoints. Values stay strings so that
/// malformed numbers fall back to defaults instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub search: Option<String>,
    pub letter: Option<String>,
    pub source: Option<String>,
}

impl ListParams {
    fn query(&self) -> ListQuery {
        ListQuery::from_raw(
            self.page.as_deref(),
            self.limit.as_deref(),
            self.search.as_deref(),
            self.letter.as_deref(),
        )
    }
}

fn push_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(HeaderName::from_static(name), v);
        }
        Err(_) => tracing::debug!("Skipping header {} with non-visible characters", name),
    }
}

fn needs_configuration(body: serde_json::Value) -> Response {
    let mut headers = HeaderMap::new();
    push_header(&mut headers, "x-needs-configuration", "true");
    (StatusCode::OK, headers, Json(body)).into_response()
}

pub async fn list_root(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<Response> {
    list(state, "/".to_string(), params).await
}

pub async fn list_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<ListParams>,
) -> AppResult<Response> {
    list(state, path, params).await
}

async fn list(state: AppState, path: String, params: ListParams) -> AppResult<Response> {
    if state.config.library.is_placeholder() {
        return Ok(needs_configuration(json!([])));
    }

    let query = params.query();
    tracing::debug!(
        "Listing {} (page={}, limit={}, search={:?}, letter={:?})",
        sanitize_for_logging(&path),
        query.page,
        query.limit,
        query.search,
        query.letter
    );
    let listing = state.lister.list(&path, &query).await?;
    state.metrics.inc_listings();

    let mut headers = HeaderMap::new();
    for (name, value) in listing.headers.pairs() {
        push_header(&mut headers, name, &value);
    }
    Ok((StatusCode::OK, headers, Json(listing.entries)).into_response())
}

pub async fn source_browse_root(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> AppResult<Response> {
    source_browse(state, "/".to_string(), params).await
}

pub async fn source_browse_path(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<ListParams>,
) -> AppResult<Response> {
    source_browse(state, path, params).await
}

async fn source_browse(state: AppState, path: String, params: ListParams) -> AppResult<Response> {
    let query = params.query();
    let listing = state.sources.browse(&path, &query, params.source.as_deref()).await?;

    let mut headers = HeaderMap::new();
    let entries: Vec<DirectoryEntry> = match listing {
        SourceListing::NotConfigured => {
            return Ok(needs_configuration(json!({
                "error": "No source directories configured",
                "data": [],
            })));
        }
        SourceListing::Roots { entries, directories } => {
            push_header(&mut headers, "x-source-directories", &directories.join(","));
            push_header(&mut headers, "x-total-count", &entries.len().to_string());
            entries
        }
        SourceListing::Directory { entries, headers: listing_headers, source_index, source_dir } => {
            for (name, value) in listing_headers.pairs() {
                push_header(&mut headers, name, &value);
            }
            push_header(&mut headers, "x-source-index", &source_index.to_string());
            push_header(&mut headers, "x-source-directory", &source_dir);
            entries
        }
    };
    state.metrics.inc_listings();
    Ok((StatusCode::OK, headers, Json(entries)).into_response())
}

/// Resolves a library path to its link target and joins what the pipeline recorded for it.
pub async fn readlink(
    State(state): State<AppState>,
    Json(req): Json<ReadlinkRequest>,
) -> AppResult<Json<ReadlinkResponse>> {
    if req.path.trim().is_empty() {
        return Err(AppError::BadRequest("path is required".into()));
    }
    validate_request_path("path", &req.path)?;

    let relative = req.path.trim().trim_start_matches(['/', '\\']).to_string();
    let abs = state.lister.root().join(&relative);
    let abs_path = abs.to_string_lossy().into_owned();

    let target = abs.clone();
    let real = spawn_blocking(move || std::fs::canonicalize(&target)).await?;
    let mut response = ReadlinkResponse { abs_path: abs_path.clone(), ..Default::default() };
    match real {
        Ok(real) => response.real_path = real.to_string_lossy().into_owned(),
        Err(e) => {
            tracing::debug!("readlink failed for {}: {}", sanitize_for_logging(&abs_path), e);
            response.error = Some(e.to_string());
        }
    }

    let mut candidates = Vec::with_capacity(2);
    if !response.real_path.is_empty() {
        candidates.push(response.real_path.clone());
    }
    candidates.push(abs_path);
    for candidate in candidates {
        match state.store.processed_for_path(&candidate).await {
            Ok(Some(row)) => {
                response.found_in_db = true;
                response.tmdb_id = row.tmdb_id;
                response.season_number = row.season_number.filter(|s| *s > 0);
                if let Some(size) = row.file_size.filter(|s| *s > 0) {
                    response.file_size = Some(size);
                    response.formatted_size = Some(format_file_size(size));
                }
                break;
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Processed-file lookup failed for {}: {}", sanitize_for_logging(&candidate), e),
        }
    }

    Ok(Json(response))
}
