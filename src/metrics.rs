use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Performance metrics for monitoring
#[derive(Clone)]
pub struct Metrics {
    pub listings_served: Arc<AtomicU64>,
    pub files_deleted: Arc<AtomicU64>,
    pub renames: Arc<AtomicU64>,
    pub events_delivered: Arc<AtomicU64>,
    pub events_dropped: Arc<AtomicU64>,
    pub bridge_forwards: Arc<AtomicU64>,
    pub metadata_upstream_calls: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            listings_served: Arc::new(AtomicU64::new(0)),
            files_deleted: Arc::new(AtomicU64::new(0)),
            renames: Arc::new(AtomicU64::new(0)),
            events_delivered: Arc::new(AtomicU64::new(0)),
            events_dropped: Arc::new(AtomicU64::new(0)),
            bridge_forwards: Arc::new(AtomicU64::new(0)),
            metadata_upstream_calls: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_listings(&self) {
        self.listings_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_deleted(&self, count: u64) {
        self.files_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_renames(&self) {
        self.renames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_events(&self, delivered: u64, dropped: u64) {
        self.events_delivered.fetch_add(delivered, Ordering::Relaxed);
        self.events_dropped.fetch_add(dropped, Ordering::Relaxed);
    }

    pub fn inc_bridge_forwards(&self) {
        self.bridge_forwards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_metadata_upstream(&self) {
        self.metadata_upstream_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            listings_served: self.listings_served.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            renames: self.renames.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            bridge_forwards: self.bridge_forwards.load(Ordering::Relaxed),
            metadata_upstream_calls: self.metadata_upstream_calls.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub listings_served: u64,
    pub files_deleted: u64,
    pub renames: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub bridge_forwards: u64,
    pub metadata_upstream_calls: u64,
    pub uptime_seconds: u64,
}
