use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::config::LibraryConfig;
use crate::store::Store;

pub const CATEGORY_TTL: Duration = Duration::from_secs(5 * 60);

struct Cached {
    folders: Arc<HashSet<String>>,
    expires: Instant,
}

/// Lowercased names of top-level organizational folders ("Movies", "4K Shows", ...).
///
/// Combines the configured names with every path component of the `base_path`
/// column the pipeline records. The combined set is cached for [`CATEGORY_TTL`].
#[derive(Clone)]
pub struct CategoryCache {
    configured: Arc<HashSet<String>>,
    cached: Arc<RwLock<Option<Cached>>>,
    ttl: Duration,
}

impl CategoryCache {
    pub fn new(cfg: &LibraryConfig) -> Self {
        Self::with_ttl(cfg, CATEGORY_TTL)
    }

    pub fn with_ttl(cfg: &LibraryConfig, ttl: Duration) -> Self {
        let mut configured: HashSet<String> =
            cfg.category_folders.iter().map(|f| f.trim().to_lowercase()).filter(|f| !f.is_empty()).collect();
        configured.insert("cinesync".to_string());
        if cfg.use_source_structure {
            for dir in cfg.source_dirs() {
                if let Some(name) = dir.file_name().and_then(|n| n.to_str()) {
                    configured.insert(name.to_lowercase());
                }
            }
        }
        Self { configured: Arc::new(configured), cached: Arc::new(RwLock::new(None)), ttl }
    }

    pub async fn folders(&self, store: &Store) -> Arc<HashSet<String>> {
        {
            let guard = self.cached.read().await;
            if let Some(c) = guard.as_ref() {
                if Instant::now() < c.expires {
                    return c.folders.clone();
                }
            }
        }

        let mut guard = self.cached.write().await;
        // Another task may have refreshed while we waited for the write lock
        if let Some(c) = guard.as_ref() {
            if Instant::now() < c.expires {
                return c.folders.clone();
            }
        }

        let mut folders: HashSet<String> = (*self.configured).clone();
        match store.category_base_paths().await {
            Ok(paths) => {
                for base in paths {
                    folders.extend(
                        base.split(['/', '\\']).filter(|p| !p.is_empty()).map(|p| p.to_lowercase()),
                    );
                }
            }
            Err(e) => tracing::warn!("Failed to load category folders from database: {}", e),
        }

        let folders = Arc::new(folders);
        *guard = Some(Cached { folders: folders.clone(), expires: Instant::now() + self.ttl });
        folders
    }

    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}
