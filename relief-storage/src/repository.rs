//! Origin data-store access for feeds, feed areas and needs.
//!
//! The production store (geo indexes, persistence) lives outside this
//! workspace; handlers only see [`FeedRepository`]. [`InMemoryRepository`]
//! backs local runs and tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use ::async_trait::async_trait;
use chrono::Utc;
use relief_core::{
    CreateNeedRequest, Feed, FeedArea, FeedAreaQuery, FeedId, FeedLocationUpdate, Need,
    NeedFilter, NeedId, RepositoryError,
};

/// Async access to the origin data store.
#[async_trait]
pub trait FeedRepository: Send + Sync {
    /// Feed areas inside the query's bounding box that pass its filters.
    async fn feed_areas(&self, query: &FeedAreaQuery) -> Result<Vec<FeedArea>, RepositoryError>;

    /// Get a feed by ID.
    async fn feed(&self, id: FeedId) -> Result<Feed, RepositoryError>;

    /// Move feed areas to corrected locations. Unknown IDs are skipped;
    /// returns how many areas changed.
    async fn update_feed_locations(
        &self,
        updates: &[FeedLocationUpdate],
    ) -> Result<u64, RepositoryError>;

    /// List needs, optionally only unresolved ones.
    async fn needs(&self, filter: &NeedFilter) -> Result<Vec<Need>, RepositoryError>;

    /// Insert a need and return it with its assigned ID.
    async fn create_need(&self, request: &CreateNeedRequest) -> Result<Need, RepositoryError>;

    /// Cheap reachability check.
    async fn health_check(&self) -> Result<(), RepositoryError>;
}

#[derive(Debug, Default)]
struct Tables {
    feeds: BTreeMap<FeedId, Feed>,
    areas: BTreeMap<FeedId, FeedArea>,
    needs: BTreeMap<NeedId, Need>,
}

/// In-memory [`FeedRepository`].
///
/// Clones share the same tables. `set_available(false)` makes every call
/// fail with [`RepositoryError::Unavailable`], which is how tests simulate
/// an origin outage.
#[derive(Debug, Clone)]
pub struct InMemoryRepository {
    tables: Arc<RwLock<Tables>>,
    available: Arc<AtomicBool>,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Insert or replace a feed together with its map area.
    pub fn insert_feed(&self, feed: Feed, area: FeedArea) -> Result<(), RepositoryError> {
        let mut tables = self.write()?;
        tables.areas.insert(area.id, area);
        tables.feeds.insert(feed.id, feed);
        Ok(())
    }

    /// Insert or replace a need.
    pub fn insert_need(&self, need: Need) -> Result<(), RepositoryError> {
        self.write()?.needs.insert(need.id, need);
        Ok(())
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn feed_count(&self) -> usize {
        self.read().map(|t| t.feeds.len()).unwrap_or(0)
    }

    pub fn need_count(&self) -> usize {
        self.read().map(|t| t.needs.len()).unwrap_or(0)
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RepositoryError::Unavailable {
                reason: "in-memory store switched off".to_string(),
            })
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, RepositoryError> {
        self.check_available()?;
        self.tables.read().map_err(|_| RepositoryError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, RepositoryError> {
        self.check_available()?;
        self.tables.write().map_err(|_| RepositoryError::LockPoisoned)
    }
}

#[async_trait]
impl FeedRepository for InMemoryRepository {
    async fn feed_areas(&self, query: &FeedAreaQuery) -> Result<Vec<FeedArea>, RepositoryError> {
        let tables = self.read()?;
        Ok(tables
            .areas
            .values()
            .filter(|area| query.matches(area))
            .cloned()
            .collect())
    }

    async fn feed(&self, id: FeedId) -> Result<Feed, RepositoryError> {
        let tables = self.read()?;
        tables
            .feeds
            .get(&id)
            .cloned()
            .ok_or(RepositoryError::NotFound { entity: "Feed", id })
    }

    async fn update_feed_locations(
        &self,
        updates: &[FeedLocationUpdate],
    ) -> Result<u64, RepositoryError> {
        let mut tables = self.write()?;
        let mut changed = 0u64;
        for update in updates {
            if let Some(area) = tables.areas.get_mut(&update.feed_id) {
                area.location = update.location;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn needs(&self, filter: &NeedFilter) -> Result<Vec<Need>, RepositoryError> {
        let tables = self.read()?;
        Ok(tables
            .needs
            .values()
            .filter(|need| !filter.only_unresolved || !need.is_resolved)
            .cloned()
            .collect())
    }

    async fn create_need(&self, request: &CreateNeedRequest) -> Result<Need, RepositoryError> {
        let mut tables = self.write()?;
        let id = tables.needs.keys().next_back().map_or(1, |last| last + 1);
        let need = Need {
            id,
            description: request.description.trim().to_string(),
            address: request.address.trim().to_string(),
            is_resolved: false,
            timestamp: Utc::now(),
            location: request.location,
        };
        tables.needs.insert(id, need.clone());
        Ok(need)
    }

    async fn health_check(&self) -> Result<(), RepositoryError> {
        self.read().map(|_| ())
    }
}
