//! Cache entries and the freshness rule they obey.
//!
//! An entry is fresh iff `now < created_at + ttl`. Nothing in the cache
//! returns an entry that fails this check, regardless of when the sweeper
//! last ran.

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use super::key::CacheKey;
use super::traits::OriginResponse;

/// A stored origin response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    key: CacheKey,
    response: OriginResponse,
    created_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    pub fn new(key: CacheKey, response: OriginResponse, created_at: Instant, ttl: Duration) -> Self {
        Self {
            key,
            response,
            created_at,
            ttl,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn response(&self) -> &OriginResponse {
        &self.response
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn expires_at(&self) -> Instant {
        self.created_at + self.ttl
    }

    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now < self.expires_at()
    }

    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }
}

/// Result of a cache lookup.
///
/// `hit` tells whether the payload came from a stored entry or from an
/// origin fetch (including one shared with other callers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRead {
    pub status: u16,
    pub content_type: Option<String>,
    pub payload: Bytes,
    pub hit: bool,
    /// Age of the served entry; zero for origin responses.
    pub age: Duration,
}

impl CacheRead {
    pub fn from_entry(entry: CacheEntry, now: Instant) -> Self {
        let age = entry.age_at(now);
        let response = entry.response;
        Self {
            status: response.status,
            content_type: response.content_type,
            payload: response.payload,
            hit: true,
            age,
        }
    }

    pub fn from_origin(response: OriginResponse) -> Self {
        Self {
            status: response.status,
            content_type: response.content_type,
            payload: response.payload,
            hit: false,
            age: Duration::ZERO,
        }
    }

    pub fn was_cache_hit(&self) -> bool {
        self.hit
    }
}
