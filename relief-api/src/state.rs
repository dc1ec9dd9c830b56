//! Shared application state for Axum routers.

use std::sync::Arc;

use relief_events::IngestionService;
use relief_storage::{FeedRepository, ResponseCache, ShardedLruBackend};

use crate::config::ApiConfig;
use crate::middleware::RateLimitState;

/// The response cache used by the read endpoints.
pub type ApiCache = ResponseCache<ShardedLruBackend>;

/// Origin store handle shared by handlers.
pub type Repository = Arc<dyn FeedRepository>;

/// Application-wide state shared across all routes.
///
/// Built once at startup; tests build a fresh one per case so no cache
/// state leaks between them.
#[derive(Clone)]
pub struct AppState {
    /// Read-through cache in front of the feed and need endpoints.
    pub cache: ApiCache,
    pub repository: Repository,
    /// Write path to the broker, possibly degraded.
    pub ingestion: Arc<IngestionService>,
    pub config: Arc<ApiConfig>,
    pub rate_limit: RateLimitState,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        cache: ApiCache,
        repository: Repository,
        ingestion: IngestionService,
        config: ApiConfig,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            cache,
            repository,
            ingestion: Arc::new(ingestion),
            rate_limit: RateLimitState::new(Arc::clone(&config)),
            config,
            start_time: std::time::Instant::now(),
        }
    }
}

crate::impl_from_ref!(ApiCache, cache);
crate::impl_from_ref!(Repository, repository);
crate::impl_from_ref!(Arc<IngestionService>, ingestion);
crate::impl_from_ref!(Arc<ApiConfig>, config);
crate::impl_from_ref!(RateLimitState, rate_limit);
crate::impl_from_ref!(std::time::Instant, start_time);
