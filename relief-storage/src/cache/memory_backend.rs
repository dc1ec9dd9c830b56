//! Sharded in-memory LRU backend.
//!
//! Entries are spread over independent shards by key hash, each shard an
//! LRU with an equal slice of the total capacity. Unrelated keys rarely
//! contend on the same mutex, and a full shard evicts its least recently
//! used entry. Eviction only ever removes entries, so it cannot make a
//! stale entry look fresh.

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use tokio::time::Instant;

use super::freshness::CacheEntry;
use super::key::{CacheKey, InvalidationScope};
use super::traits::{BackendStats, CacheBackend};

type Shard = Mutex<LruCache<CacheKey, CacheEntry>>;

pub struct ShardedLruBackend {
    shards: Box<[Shard]>,
    hasher: RandomState,
    capacity: usize,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl ShardedLruBackend {
    /// Create a backend holding at most roughly `capacity` entries over
    /// `shards` shards. Both values are clamped to at least one.
    pub fn new(capacity: usize, shards: usize) -> Self {
        let shard_count = shards.max(1);
        let per_shard = capacity.max(1).div_ceil(shard_count);
        let per_shard = NonZeroUsize::new(per_shard).unwrap_or(NonZeroUsize::MIN);

        let shards = (0..shard_count)
            .map(|_| Mutex::new(LruCache::new(per_shard)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            hasher: RandomState::new(),
            capacity: per_shard.get() * shard_count,
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    fn shard_for(&self, key: &CacheKey) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
        let index = (self.hasher.hash_one(key) as usize) % self.shards.len();
        lock(&self.shards[index])
    }

    fn remove_where(&self, mut predicate: impl FnMut(&CacheEntry) -> bool) -> u64 {
        let mut removed = 0u64;
        for shard in self.shards.iter() {
            let mut shard = lock(shard);
            let doomed: Vec<CacheKey> = shard
                .iter()
                .filter(|(_, entry)| predicate(entry))
                .map(|(key, _)| key.clone())
                .collect();
            for key in doomed {
                if shard.pop(&key).is_some() {
                    removed += 1;
                }
            }
        }
        removed
    }
}

// A panic while a shard was held cannot leave a half-written entry behind:
// every mutation is a single LruCache call.
fn lock(shard: &Shard) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
    shard.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CacheBackend for ShardedLruBackend {
    fn get(&self, key: &CacheKey, now: Instant) -> Option<CacheEntry> {
        let mut shard = self.shard_for(key);
        match shard.get(key) {
            Some(entry) if entry.is_fresh_at(now) => return Some(entry.clone()),
            Some(_) => {}
            None => return None,
        }
        shard.pop(key);
        self.expirations.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn insert(&self, entry: CacheEntry) {
        let key = entry.key().clone();
        let mut shard = self.shard_for(&key);
        if let Some((displaced, _)) = shard.push(key.clone(), entry) {
            if displaced != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn remove(&self, key: &CacheKey) -> bool {
        self.shard_for(key).pop(key).is_some()
    }

    fn invalidate(&self, scope: &InvalidationScope) -> u64 {
        match scope {
            InvalidationScope::Exact(key) => u64::from(self.remove(key)),
            _ => self.remove_where(|entry| scope.matches(entry.key())),
        }
    }

    fn purge_expired(&self, now: Instant) -> u64 {
        let purged = self.remove_where(|entry| !entry.is_fresh_at(now));
        self.expirations.fetch_add(purged, Ordering::Relaxed);
        purged
    }

    fn stats(&self) -> BackendStats {
        let entries = self.shards.iter().map(|s| lock(s).len() as u64).sum();
        BackendStats {
            entries,
            capacity: self.capacity as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}
