//! RELIEF Storage - response cache and origin repository
//!
//! The read path of the API: a single-flight read-through cache in front of
//! the origin data store, and the repository trait the origin handlers use.

pub mod cache;
pub mod repository;

// Re-export cache types for API integration
pub use cache::{
    BackendStats, CacheBackend, CacheConfig, CacheEntry, CacheError, CacheKey, CacheRead,
    CacheStats, InvalidationScope, OriginError, OriginResolver, OriginResponse,
    RequestDescriptor, ResponseCache, ShardedLruBackend,
};
pub use repository::{FeedRepository, InMemoryRepository};
