use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::library::format_file_size;
use crate::store::{LibraryCounts, Store};
use crate::types::StatsSnapshot;

pub const STATS_TTL: Duration = Duration::from_secs(30);

/// Dashboard statistics, recomputed from the database at most every [`STATS_TTL`].
///
/// Locks are only held to read or swap the cached value; two concurrent
/// refreshes may both hit the database.
#[derive(Clone)]
pub struct StatsCache {
    cached: Arc<Mutex<Option<(Instant, StatsSnapshot)>>>,
    ttl: Duration,
    ip: String,
    port: String,
}

impl StatsCache {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self::with_ttl(ip, port, STATS_TTL)
    }

    pub fn with_ttl(ip: impl Into<String>, port: u16, ttl: Duration) -> Self {
        Self { cached: Arc::new(Mutex::new(None)), ttl, ip: ip.into(), port: port.to_string() }
    }

    fn fresh(&self) -> Option<StatsSnapshot> {
        let guard = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        guard.as_ref().filter(|(at, _)| at.elapsed() < self.ttl).map(|(_, s)| s.clone())
    }

    pub async fn get(&self, store: &Store, force: bool) -> StatsSnapshot {
        if !force {
            if let Some(snapshot) = self.fresh() {
                return snapshot;
            }
        }

        let counts = store.library_counts().await.unwrap_or_else(|e| {
            tracing::warn!("Failed to compute library stats: {}", e);
            LibraryCounts::default()
        });
        let snapshot = self.snapshot_from(counts);

        let mut guard = self.cached.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, previous)) = guard.as_ref() {
            if previous.total_files != snapshot.total_files || previous.total_size != snapshot.total_size {
                tracing::info!(
                    "Library stats changed: {} files, {} folders, {}",
                    snapshot.total_files,
                    snapshot.total_folders,
                    snapshot.total_size
                );
            }
        }
        *guard = Some((Instant::now(), snapshot.clone()));
        snapshot
    }

    /// Drops the cached snapshot so the next request recomputes it.
    pub fn invalidate(&self) {
        *self.cached.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn snapshot_from(&self, counts: LibraryCounts) -> StatsSnapshot {
        let size = format_file_size(counts.size);
        StatsSnapshot {
            total_files: counts.files,
            total_folders: counts.folders,
            total_size: size.clone(),
            last_sync: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            webdav_status: "Active".to_string(),
            storage_used: size,
            ip: self.ip.clone(),
            port: self.port.clone(),
            total_movies: counts.movies,
            total_shows: counts.shows,
        }
    }
}
