//! Response cache for the read endpoints.
//!
//! Reads go through [`ResponseCache`]: a fresh entry is served directly,
//! anything else is fetched from the origin once per key no matter how many
//! callers are waiting, stored, and returned.
//!
//! # Freshness
//!
//! An entry is fresh iff `now < created_at + ttl`, where `ttl` is the
//! configured TTL shortened by the origin's `max_age` hint. Expired entries
//! are dropped when read and by the background sweeper; neither LRU
//! eviction nor invalidation can make an expired entry visible again.
//!
//! # Example
//!
//! ```ignore
//! let cache = ResponseCache::in_memory(CacheConfig::default());
//! let request = RequestDescriptor::get("/needs").with_param("only_not_resolved", "true");
//! let read = cache.get(&request, resolver).await?;
//! if read.hit {
//!     tracing::debug!(age_ms = read.age.as_millis() as u64, "served from cache");
//! }
//! cache.invalidate(&InvalidationScope::path_prefix("/needs"));
//! ```

pub mod freshness;
pub mod key;
pub mod memory_backend;
pub mod read_through;
pub mod traits;

pub use freshness::{CacheEntry, CacheRead};
pub use key::{CacheKey, InvalidationScope, RequestDescriptor};
pub use memory_backend::ShardedLruBackend;
pub use read_through::{CacheConfig, CacheError, ResponseCache};
pub use traits::{
    BackendStats, CacheBackend, CacheStats, OriginError, OriginResolver, OriginResponse,
};
