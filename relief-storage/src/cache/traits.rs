//! Origin resolver and cache backend traits.
//!
//! The cache talks to two collaborators: the origin that computes a payload
//! on a miss, and the backend that holds entries between reads. Both are
//! traits so tests can substitute counting or failing implementations.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::time::Instant;

use super::freshness::CacheEntry;
use super::key::{CacheKey, InvalidationScope, RequestDescriptor};

/// A payload produced by the origin, plus the metadata needed to replay it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginResponse {
    /// Status reported by the origin (HTTP semantics).
    pub status: u16,
    pub content_type: Option<String>,
    pub payload: Bytes,
    /// Origin freshness hint. Can shorten the configured TTL, never extend it.
    pub max_age: Option<Duration>,
}

impl OriginResponse {
    pub fn new(status: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: None,
            payload: payload.into(),
            max_age: None,
        }
    }

    /// A 200 response with a JSON content type.
    pub fn json(payload: impl Into<Bytes>) -> Self {
        Self::new(200, payload).with_content_type("application/json")
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Only successful responses are stored.
    pub fn is_cacheable(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Why the origin could not answer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OriginError {
    #[error("origin failed: {reason}")]
    Failed { reason: String },

    #[error("origin timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("origin fetch aborted before completion")]
    Aborted,
}

impl OriginError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }
}

/// Computes the payload for a request on a cache miss.
#[async_trait]
pub trait OriginResolver: Send + Sync {
    async fn resolve(&self, request: &RequestDescriptor) -> Result<OriginResponse, OriginError>;
}

/// Storage for cache entries.
///
/// Implementations must never return an entry that is not fresh at `now`,
/// and must be safe to call from many threads. Calls are synchronous: the
/// cache invokes them while holding per-key registry locks, so they must
/// not block on I/O.
pub trait CacheBackend: Send + Sync {
    /// Return a fresh entry, dropping it if it has expired.
    fn get(&self, key: &CacheKey, now: Instant) -> Option<CacheEntry>;

    /// Insert or overwrite the entry for its key.
    fn insert(&self, entry: CacheEntry);

    /// Remove one key. Returns whether an entry was present.
    fn remove(&self, key: &CacheKey) -> bool;

    /// Remove every entry the scope matches, returning how many went.
    fn invalidate(&self, scope: &InvalidationScope) -> u64;

    /// Drop all entries that are no longer fresh at `now`.
    fn purge_expired(&self, now: Instant) -> u64;

    fn stats(&self) -> BackendStats;
}

/// Point-in-time backend counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    pub entries: u64,
    pub capacity: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// Point-in-time statistics for the whole cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Callers that joined another caller's in-flight fetch.
    pub coalesced: u64,
    pub origin_fetches: u64,
    pub origin_failures: u64,
    pub invalidated: u64,
    pub in_flight: u64,
    pub entries: u64,
    pub capacity: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Hit rate over all lookups (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.coalesced;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_success_is_cacheable() {
        assert!(OriginResponse::json("[]").is_cacheable());
        assert!(OriginResponse::new(204, "").is_cacheable());
        assert!(!OriginResponse::new(404, "{}").is_cacheable());
        assert!(!OriginResponse::new(500, "{}").is_cacheable());
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }
}
