//! Read-through response cache with single-flight origin fetches.
//!
//! On a miss the first caller for a key registers an in-flight marker and
//! spawns the origin fetch; every caller that arrives for the same key
//! while the marker is present awaits that same fetch instead of starting
//! its own. The registry is a sharded concurrent map, so unrelated keys do
//! not serialize on one lock.
//!
//! Lock order when nested: in-flight registry shard, then backend shard.
//! No lock is held across an `.await`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use super::freshness::{CacheEntry, CacheRead};
use super::key::{CacheKey, InvalidationScope, RequestDescriptor};
use super::memory_backend::ShardedLruBackend;
use super::traits::{CacheBackend, CacheStats, OriginError, OriginResolver, OriginResponse};

/// Configuration for the response cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime of a stored entry.
    pub ttl: Duration,
    /// Maximum number of entries before LRU eviction.
    pub capacity: usize,
    /// Number of backend shards.
    pub shards: usize,
    /// Upper bound on a single origin fetch.
    pub origin_timeout: Duration,
    /// Active expiry interval. `None` leaves expiry to reads alone.
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            capacity: 10_000,
            shards: 16,
            origin_timeout: Duration::from_secs(5),
            sweep_interval: Some(Duration::from_secs(30)),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    pub fn with_origin_timeout(mut self, timeout: Duration) -> Self {
        self.origin_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// TTL for a response: the configured TTL, shortened by the origin's
    /// max-age hint if it gave one.
    pub fn effective_ttl(&self, response: &OriginResponse) -> Duration {
        match response.max_age {
            Some(max_age) => self.ttl.min(max_age),
            None => self.ttl,
        }
    }
}

/// Errors surfaced by [`ResponseCache`] reads.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("origin unavailable for {key}: {source}")]
    OriginUnavailable { key: String, source: OriginError },
}

impl CacheError {
    fn origin(key: &CacheKey, source: OriginError) -> Self {
        Self::OriginUnavailable {
            key: key.to_string(),
            source,
        }
    }
}

type FetchResult = Result<OriginResponse, CacheError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

struct InFlight {
    id: u64,
    fetch: SharedFetch,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    origin_fetches: AtomicU64,
    origin_failures: AtomicU64,
    invalidated: AtomicU64,
}

/// Read-through cache for origin responses.
///
/// Cloning is cheap and every clone shares the same entries, in-flight
/// registry and counters.
pub struct ResponseCache<B = ShardedLruBackend>
where
    B: CacheBackend + 'static,
{
    backend: Arc<B>,
    inflight: Arc<DashMap<CacheKey, InFlight>>,
    counters: Arc<Counters>,
    next_fetch_id: Arc<AtomicU64>,
    config: CacheConfig,
}

impl ResponseCache<ShardedLruBackend> {
    /// Create a cache backed by a sharded in-memory LRU sized from `config`.
    pub fn in_memory(config: CacheConfig) -> Self {
        let backend = ShardedLruBackend::new(config.capacity, config.shards);
        Self::new(Arc::new(backend), config)
    }
}

impl<B> ResponseCache<B>
where
    B: CacheBackend + 'static,
{
    pub fn new(backend: Arc<B>, config: CacheConfig) -> Self {
        Self {
            backend,
            inflight: Arc::new(DashMap::new()),
            counters: Arc::new(Counters::default()),
            next_fetch_id: Arc::new(AtomicU64::new(1)),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Look up `request`, resolving it through `resolver` on a miss.
    pub async fn get<R>(
        &self,
        request: &RequestDescriptor,
        resolver: Arc<R>,
    ) -> Result<CacheRead, CacheError>
    where
        R: OriginResolver + ?Sized + 'static,
    {
        let owned = request.clone();
        self.get_with(request, move || async move { resolver.resolve(&owned).await })
            .await
    }

    /// Look up `request`, running `fetch` on a miss.
    ///
    /// `fetch` is only invoked if this caller becomes the leader for the
    /// key; callers that join an existing fetch drop their closure unused.
    pub async fn get_with<F, Fut>(
        &self,
        request: &RequestDescriptor,
        fetch: F,
    ) -> Result<CacheRead, CacheError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<OriginResponse, OriginError>> + Send + 'static,
    {
        let key = CacheKey::from_request(request);

        if let Some(read) = self.lookup(&key) {
            return Ok(read);
        }

        let (shared, leader) = match self.inflight.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                (occupied.get().fetch.clone(), None)
            }
            Entry::Vacant(vacant) => {
                // A fetch may have completed between the first lookup and
                // taking the registry shard.
                if let Some(read) = self.lookup(&key) {
                    return Ok(read);
                }
                self.counters.misses.fetch_add(1, Ordering::Relaxed);

                let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel::<FetchResult>();
                let aborted_key = key.clone();
                let shared = async move {
                    rx.await
                        .unwrap_or_else(|_| Err(CacheError::origin(&aborted_key, OriginError::Aborted)))
                }
                .boxed()
                .shared();

                vacant.insert(InFlight {
                    id,
                    fetch: shared.clone(),
                });
                (shared, Some((id, tx)))
            }
        };

        if let Some((id, tx)) = leader {
            self.spawn_fetch(key, id, fetch, tx);
        }

        shared.await.map(CacheRead::from_origin)
    }

    fn lookup(&self, key: &CacheKey) -> Option<CacheRead> {
        let now = Instant::now();
        let entry = self.backend.get(key, now)?;
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Some(CacheRead::from_entry(entry, now))
    }

    fn spawn_fetch<F, Fut>(&self, key: CacheKey, id: u64, fetch: F, tx: oneshot::Sender<FetchResult>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<OriginResponse, OriginError>> + Send + 'static,
    {
        let guard = InFlightGuard {
            inflight: Arc::clone(&self.inflight),
            backend: Arc::clone(&self.backend),
            key: key.clone(),
            id,
            finished: false,
        };
        let counters = Arc::clone(&self.counters);
        let config = self.config.clone();
        let span = tracing::debug_span!("origin_fetch", key = %key);

        tokio::spawn(
            async move {
                let mut guard = guard;
                counters.origin_fetches.fetch_add(1, Ordering::Relaxed);
                let started = Instant::now();

                let outcome = match tokio::time::timeout(config.origin_timeout, fetch()).await {
                    Ok(result) => result,
                    Err(_) => Err(OriginError::Timeout {
                        after: config.origin_timeout,
                    }),
                };

                let result = match outcome {
                    Ok(response) => {
                        let ttl = config.effective_ttl(&response);
                        let entry = (response.is_cacheable() && !ttl.is_zero()).then(|| {
                            CacheEntry::new(key.clone(), response.clone(), Instant::now(), ttl)
                        });
                        let stored = guard.complete(entry);
                        tracing::debug!(
                            status = response.status,
                            stored,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Origin fetch completed"
                        );
                        Ok(response)
                    }
                    Err(error) => {
                        counters.origin_failures.fetch_add(1, Ordering::Relaxed);
                        guard.complete(None);
                        tracing::warn!(error = %error, "Origin fetch failed");
                        Err(CacheError::origin(&key, error))
                    }
                };

                // Waiters may all have gone away; nothing to do then.
                let _ = tx.send(result);
            }
            .instrument(span),
        );
    }

    /// Remove every entry matching `scope`. Idempotent; returns how many
    /// stored entries were removed.
    ///
    /// In-flight fetches for matching keys are detached first: their
    /// current waiters still receive the result, but it is not stored, and
    /// the next read for the key starts a new fetch.
    pub fn invalidate(&self, scope: &InvalidationScope) -> u64 {
        let mut detached = 0u64;
        self.inflight.retain(|key, _| {
            let matched = scope.matches(key);
            if matched {
                detached += 1;
            }
            !matched
        });

        let removed = self.backend.invalidate(scope);
        self.counters.invalidated.fetch_add(removed, Ordering::Relaxed);
        tracing::info!(scope = %scope, removed, detached, "Cache invalidated");
        removed
    }

    /// Drop expired entries now. Returns the number removed.
    pub fn purge_expired(&self) -> u64 {
        self.backend.purge_expired(Instant::now())
    }

    /// Start the background sweep. The task runs until the handle is
    /// aborted or the runtime shuts down.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = backend.purge_expired(Instant::now());
                if purged > 0 {
                    tracing::debug!(purged, "Swept expired cache entries");
                }
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        let backend = self.backend.stats();
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            origin_fetches: self.counters.origin_fetches.load(Ordering::Relaxed),
            origin_failures: self.counters.origin_failures.load(Ordering::Relaxed),
            invalidated: self.counters.invalidated.load(Ordering::Relaxed),
            in_flight: self.inflight.len() as u64,
            entries: backend.entries,
            capacity: backend.capacity,
            evictions: backend.evictions,
            expirations: backend.expirations,
        }
    }
}

impl<B> Clone for ResponseCache<B>
where
    B: CacheBackend + 'static,
{
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            inflight: Arc::clone(&self.inflight),
            counters: Arc::clone(&self.counters),
            next_fetch_id: Arc::clone(&self.next_fetch_id),
            config: self.config.clone(),
        }
    }
}

/// Owns a key's in-flight registration for the lifetime of its fetch task.
///
/// Dropping the guard without `complete` (panic, runtime shutdown) still
/// deregisters, so a dead fetch never blocks the key.
struct InFlightGuard<B: CacheBackend> {
    inflight: Arc<DashMap<CacheKey, InFlight>>,
    backend: Arc<B>,
    key: CacheKey,
    id: u64,
    finished: bool,
}

impl<B: CacheBackend> InFlightGuard<B> {
    /// Deregister, storing `entry` only if the registration is still ours.
    /// A registration removed by invalidation means the result must not be
    /// stored. Returns whether the entry was stored.
    fn complete(&mut self, entry: Option<CacheEntry>) -> bool {
        self.finished = true;
        match self.inflight.entry(self.key.clone()) {
            Entry::Occupied(occupied) if occupied.get().id == self.id => {
                let stored = match entry {
                    Some(entry) => {
                        self.backend.insert(entry);
                        true
                    }
                    None => false,
                };
                occupied.remove();
                stored
            }
            _ => false,
        }
    }
}

impl<B: CacheBackend> Drop for InFlightGuard<B> {
    fn drop(&mut self) {
        if !self.finished {
            let id = self.id;
            self.inflight.remove_if(&self.key, |_, current| current.id == id);
        }
    }
}
