//! Cross-module tests for webdavhub.
//!
//! Every test gets its own temporary SQLite file and library directory.
//!
//! ## Test Modules
//!
//! - **store_tests**: queries of the folder mirror, processed files, metadata cache and recent media
//! - **listing_tests**: directory listings against a real tree plus the folder mirror
//! - **api_tests**: the full router, driven with `tower::ServiceExt::oneshot` or served on a local port for streams
//! - **ingest_tests**: side effects of pipeline messages
//! - **config_tests**: defaults, validation and config helpers
//! - **error_tests**: status codes and the JSON error envelope

pub mod api_tests;
pub mod ingest_tests;

use std::path::Path;

use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Sqlite, SqlitePool};
use tempfile::{NamedTempFile, TempDir};

use crate::config::AppConfig;
use crate::state::AppState;
use crate::store::Store;

/// Keeps the temporary database file and library tree alive for a test.
pub struct TestEnv {
    pub state: AppState,
    pub library: TempDir,
    _db: NamedTempFile,
}

impl TestEnv {
    pub fn root(&self) -> &Path {
        self.state.mutator.root()
    }

    pub fn store(&self) -> &Store {
        &self.state.store
    }
}

pub async fn test_pool() -> (SqlitePool, NamedTempFile) {
    let temp_db = NamedTempFile::new().unwrap();
    let db_url = format!("sqlite:{}", temp_db.path().display());
    Sqlite::create_database(&db_url).await.unwrap();
    let pool = SqlitePoolOptions::new().max_connections(1).connect(&db_url).await.unwrap();
    crate::db::init_db(&pool).await.unwrap();
    (pool, temp_db)
}

pub fn test_config(destination: &Path) -> AppConfig {
    let mut config = AppConfig::default();
    config.library.destination_dir = destination.to_string_lossy().into_owned();
    config.library.source_dir = String::new();
    // Nothing listens here; upstream searches fail fast
    config.metadata.api_host = "http://127.0.0.1:9".to_string();
    config.metadata.timeout_ms = 200;
    config
}

pub async fn test_env_with(configure: impl FnOnce(&mut AppConfig, &Path)) -> TestEnv {
    let library = TempDir::new().unwrap();
    let (pool, db) = test_pool().await;
    let mut config = test_config(library.path());
    configure(&mut config, library.path());
    let state = AppState::new(pool, config).unwrap();
    TestEnv { state, library, _db: db }
}

pub async fn test_env() -> TestEnv {
    test_env_with(|_, _| {}).await
}

/// Creates `rel` (and its parents) below `root`; a trailing `/` makes a directory.
pub fn touch(root: &Path, rel: &str) {
    let path = root.join(rel.trim_end_matches('/'));
    if rel.ends_with('/') {
        std::fs::create_dir_all(&path).unwrap();
    } else {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, b"media").unwrap();
    }
}
