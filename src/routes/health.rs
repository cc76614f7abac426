use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    error::AppResult,
    middleware::ip::ClientIp,
    state::AppState,
    types::{ConfigStatus, StatsSnapshot},
};

// Liveness - kein DB-Zugriff, kein Auth
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": chrono::Utc::now().timestamp() }))
}

pub async fn auth_enabled(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "enabled": state.config.auth.enabled }))
}

// Reaching the handler means the auth middleware accepted the request
pub async fn auth_test() -> StatusCode {
    StatusCode::OK
}

pub async fn config_status(State(state): State<AppState>) -> Json<ConfigStatus> {
    let library = &state.config.library;
    let is_placeholder = library.is_placeholder();
    Json(ConfigStatus {
        is_placeholder,
        destination_dir: library.destination_dir.clone(),
        effective_root_dir: state.lister.root().to_string_lossy().into_owned(),
        needs_configuration: is_placeholder,
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct StatsParams {
    pub refresh: Option<String>,
}

/// Dashboard numbers, cached for a short while. `?refresh=true` recomputes them.
pub async fn stats(State(state): State<AppState>, Query(params): Query<StatsParams>) -> Json<StatsSnapshot> {
    let force = params.refresh.as_deref().is_some_and(|v| v.eq_ignore_ascii_case("true") || v == "1");
    Json(state.stats.get(&state.store, force).await)
}

// Metrics endpoint: returns JSON snapshot
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.get_snapshot())
}

// Prometheus-compatible text exposition format
pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let m = state.metrics.get_snapshot();
    let body = format!(
        "# HELP webdavhub_listings_served Directory listings served\n# TYPE webdavhub_listings_served counter\nwebdavhub_listings_served {}\n\
# HELP webdavhub_files_deleted Entries deleted\n# TYPE webdavhub_files_deleted counter\nwebdavhub_files_deleted {}\n\
# HELP webdavhub_renames Renames performed\n# TYPE webdavhub_renames counter\nwebdavhub_renames {}\n\
# HELP webdavhub_events_delivered Events delivered to SSE subscribers\n# TYPE webdavhub_events_delivered counter\nwebdavhub_events_delivered {}\n\
# HELP webdavhub_events_dropped Events dropped on full subscriber buffers\n# TYPE webdavhub_events_dropped counter\nwebdavhub_events_dropped {}\n\
# HELP webdavhub_bridge_forwards Messages forwarded to the bridge\n# TYPE webdavhub_bridge_forwards counter\nwebdavhub_bridge_forwards {}\n\
# HELP webdavhub_metadata_upstream_calls Metadata search requests\n# TYPE webdavhub_metadata_upstream_calls counter\nwebdavhub_metadata_upstream_calls {}\n\
# HELP webdavhub_uptime_seconds Uptime seconds\n# TYPE webdavhub_uptime_seconds gauge\nwebdavhub_uptime_seconds {}\n",
        m.listings_served,
        m.files_deleted,
        m.renames,
        m.events_delivered,
        m.events_dropped,
        m.bridge_forwards,
        m.metadata_upstream_calls,
        m.uptime_seconds,
    );
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

/// Answers first, then cancels the shutdown token so the server drains and exits.
/// A process supervisor is expected to start it again.
pub async fn restart(State(state): State<AppState>, ClientIp(ip): ClientIp) -> AppResult<impl IntoResponse> {
    state.rate_limiter.check_endpoint_limit("/api/restart", ip).await?;
    tracing::warn!("Restart requested by {}", ip);

    let token = state.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        token.cancel();
    });

    Ok(Json(json!({ "status": "success", "message": "Server restart initiated" })))
}
