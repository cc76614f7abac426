use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::events::{bridge::ActiveBridge, hub::EventHub, ingest::Ingestor};
use crate::library::{categories::CategoryCache, listing::Lister, mutate::SafeMutator, source::SourceBrowser};
use crate::metadata::MetadataGateway;
use crate::metrics::Metrics;
use crate::middleware::EndpointRateLimiter;
use crate::stats::StatsCache;
use crate::store::Store;

/// Shared application state, cloned into every handler.
///
/// Every component is a cheap handle over shared data, so cloning the state
/// never copies caches or connections.
#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::SqlitePool,
    pub store: Store,
    pub config: Arc<AppConfig>,
    pub metrics: Metrics,
    /// Per-endpoint limits for the mutating routes.
    pub rate_limiter: EndpointRateLimiter,
    pub hub: EventHub,
    pub bridge: ActiveBridge,
    pub ingest: Ingestor,
    pub metadata: MetadataGateway,
    pub categories: CategoryCache,
    pub lister: Lister,
    pub sources: SourceBrowser,
    pub mutator: SafeMutator,
    pub stats: StatsCache,
    /// Cancelled by `POST /api/restart`; the server shuts down gracefully afterwards.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(db: sqlx::SqlitePool, config: AppConfig) -> anyhow::Result<Self> {
        let rate_limiter = EndpointRateLimiter::new().with_limits(vec![
            ("/api/delete", 60, 60),   // 60 deletes per minute
            ("/api/rename", 60, 60),   // 60 renames per minute
            ("/api/restart", 5, 60),
        ]);

        let store = Store::new(db.clone());
        let metrics = Metrics::new();
        let metadata = MetadataGateway::new(store.clone(), &config.metadata)?;
        let categories = CategoryCache::new(&config.library);
        let root = config.library.destination_root();
        let lister = Lister::new(
            root.clone(),
            store.clone(),
            metadata.clone(),
            categories.clone(),
            config.library.allowed_extensions(),
        );
        let sources = SourceBrowser::new(config.library.source_dirs(), store.clone());
        let mutator = SafeMutator::new(&root)?;
        let stats = StatsCache::new(config.server.host.clone(), config.server.port);
        let hub = EventHub::new(config.events.subscriber_capacity, metrics.clone());
        let ingest = Ingestor::new(store.clone(), hub.clone(), categories.clone(), stats.clone(), mutator.root());

        Ok(Self {
            db,
            store,
            config: Arc::new(config),
            metrics,
            rate_limiter,
            hub,
            bridge: ActiveBridge::new(),
            ingest,
            metadata,
            categories,
            lister,
            sources,
            mutator,
            stats,
            shutdown: CancellationToken::new(),
        })
    }
}
