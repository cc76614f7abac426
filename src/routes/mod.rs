//! HTTP route handlers for the webdavhub API.
//!
//! - `files`: library listings, source browsing and `readlink`
//! - `mutations`: delete and rename inside the destination root
//! - `records`: file details and the metadata cache
//! - `mediahub`: pipeline messages, SSE events, the bridge stream and recent media
//! - `health`: health, auth checks, config status, stats, metrics and restart
//!
//! [`router`] wires them under `/api`; [`app`] adds the middleware stack.

pub mod files;
pub mod health;
pub mod mediahub;
pub mod mutations;
pub mod records;

use axum::extract::DefaultBodyLimit;
use axum::http::header::CONTENT_TYPE;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::compression::predicate::{DefaultPredicate, Predicate};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use crate::middleware::{self, security_headers::is_stream_content_type};
use crate::state::AppState;

/// All `/api` routes. Routes that the pipeline or health checks call without a token
/// stay outside the auth layer.
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/files", get(files::list_root))
        .route("/files/{*path}", get(files::list_path))
        .route("/source-browse", get(files::source_browse_root))
        .route("/source-browse/{*path}", get(files::source_browse_path))
        .route("/readlink", post(files::readlink))
        .route("/delete", post(mutations::delete).delete(mutations::delete))
        .route("/rename", post(mutations::rename))
        .route(
            "/file-details",
            get(records::get_file_details)
                .post(records::upsert_file_details)
                .delete(records::delete_file_details),
        )
        .route(
            "/tmdb-cache",
            get(records::get_tmdb_cache).post(records::upsert_tmdb_cache).delete(records::clear_tmdb_cache),
        )
        .route("/mediahub-events", get(mediahub::events))
        .route("/recent-media", get(mediahub::recent_media))
        .route("/stats", get(health::stats))
        .route("/config-status", get(health::config_status))
        .route("/auth-test", get(health::auth_test))
        .route("/restart", post(health::restart))
        .route("/metrics", get(health::metrics))
        .route("/metrics/prometheus", get(health::metrics_prometheus))
        .route_layer(from_fn_with_state(state.clone(), middleware::auth::auth_middleware));

    let public = Router::new()
        .route("/health", get(health::health))
        .route("/auth-enabled", get(health::auth_enabled))
        .route("/mediahub-message", post(mediahub::post_message))
        .route("/mediahub-bridge", get(mediahub::bridge));

    Router::new().nest("/api", protected.merge(public)).with_state(state)
}

// Kompression für alles außer Live-Streams (SSE, NDJSON-Bridge)
#[derive(Clone)]
struct NoStreamDefault(DefaultPredicate);

impl Predicate for NoStreamDefault {
    fn should_compress<B: axum::body::HttpBody>(&self, res: &axum::http::Response<B>) -> bool {
        if let Some(ct) = res.headers().get(CONTENT_TYPE).and_then(|ct| ct.to_str().ok()) {
            if is_stream_content_type(ct) {
                return false;
            }
        }
        self.0.should_compress(res)
    }
}

/// The complete application: routes plus the middleware stack.
pub fn app(state: AppState) -> Router {
    let cfg = state.config.clone();
    let compression = CompressionLayer::new().compress_when(NoStreamDefault(DefaultPredicate::new()));

    let app = router(state)
        .layer(DefaultBodyLimit::max(cfg.server.max_body_bytes))
        .layer(from_fn_with_state(cfg.clone(), middleware::validation::validate_request_middleware))
        .layer(from_fn(middleware::rate_limit::rate_limit_middleware))
        .layer(compression)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(cfg, middleware::security_headers::security_headers_middleware));

    // CORS: in Debug permissiv (lokale UI-Entwicklung), im Release same-origin
    if cfg!(debug_assertions) {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}
