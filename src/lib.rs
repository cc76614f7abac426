//! # webdavhub
//!
//! Backend for a media library kept on disk by an external processing
//! pipeline. It serves paginated, metadata-enriched directory listings of the
//! destination library, browses the source directories, performs safe delete
//! and rename operations, caches TMDB-shaped metadata and relays pipeline
//! events to browsers (SSE) and to a single bridge consumer (NDJSON).
//!
//! ## Architecture
//!
//! - **Axum** for routing and middleware
//! - **SQLx** (SQLite) for the folder mirror, processed files, metadata cache and recent media
//! - **Tokio** for the runtime and `spawn_blocking` filesystem work
//! - **Serde** for the JSON API
//!
//! ## Core Components
//!
//! - [`config`]: layered configuration (embedded defaults, files, environment)
//! - [`db`]: schema initialization
//! - [`store`]: all SQL queries behind one clonable handle
//! - [`library`]: path resolution, listings, source browsing, safe mutations
//! - [`metadata`]: read-through metadata cache with upstream search
//! - [`events`]: SSE hub, bridge and pipeline message ingestion
//! - [`stats`]: cached dashboard statistics
//! - [`error`]: the JSON error envelope
//! - [`middleware`]: security headers, validation, rate limiting, bearer auth
//! - [`routes`]: HTTP handlers and the router
//! - [`state`]: shared application state

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod library;
pub mod metadata;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod stats;
pub mod store;
pub mod types;

#[cfg(test)]
mod tests;
