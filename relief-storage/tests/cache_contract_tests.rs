//! Contract tests for the response cache: single-flight, freshness and
//! invalidation racing in-flight fetches.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use relief_storage::{
    CacheConfig, CacheKey, InvalidationScope, OriginError, OriginResolver, OriginResponse,
    RequestDescriptor, ResponseCache,
};
use tokio::sync::{Barrier, Notify};

struct CountingOrigin {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingOrigin {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OriginResolver for CountingOrigin {
    async fn resolve(&self, request: &RequestDescriptor) -> Result<OriginResponse, OriginError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        Ok(OriginResponse::json(format!(
            "{{\"path\":\"{}\",\"version\":{}}}",
            request.path, n
        )))
    }
}

fn test_cache(ttl: Duration) -> ResponseCache {
    ResponseCache::in_memory(
        CacheConfig::new()
            .with_ttl(ttl)
            .with_capacity(1_000)
            .with_shards(8)
            .with_sweep_interval(None),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn hundred_concurrent_misses_share_one_fetch() {
    let cache = test_cache(Duration::from_secs(60));
    let origin = CountingOrigin::new(Duration::from_millis(50));
    let barrier = Arc::new(Barrier::new(100));

    let mut handles = Vec::with_capacity(100);
    for _ in 0..100 {
        let cache = cache.clone();
        let origin = origin.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            let request = RequestDescriptor::get("/feeds/areas")
                .with_param("sw_lat", "36")
                .with_param("ne_lat", "38");
            cache.get(&request, origin).await
        }));
    }

    let mut payloads = Vec::with_capacity(100);
    for handle in handles {
        payloads.push(handle.await.unwrap().unwrap().payload);
    }

    assert_eq!(origin.calls(), 1);
    assert!(payloads.iter().all(|p| p == &payloads[0]));

    let stats = cache.stats();
    assert_eq!(stats.origin_fetches, 1);
    assert_eq!(stats.hits + stats.misses + stats.coalesced, 100);
    assert_eq!(stats.in_flight, 0);
}

#[tokio::test]
async fn repeated_reads_are_identical_with_one_origin_call() {
    let cache = test_cache(Duration::from_secs(60));
    let origin = CountingOrigin::new(Duration::ZERO);
    let request = RequestDescriptor::get("/needs").with_param("only_not_resolved", "true");

    let first = cache.get(&request, origin.clone()).await.unwrap();
    for _ in 0..10 {
        let again = cache.get(&request, origin.clone()).await.unwrap();
        assert_eq!(again.payload, first.payload);
        assert!(again.hit);
    }
    assert_eq!(origin.calls(), 1);
}

#[tokio::test]
async fn invalidate_then_get_fetches_exactly_once() {
    let cache = test_cache(Duration::from_secs(60));
    let origin = CountingOrigin::new(Duration::ZERO);
    let request = RequestDescriptor::get("/feeds/12");

    cache.get(&request, origin.clone()).await.unwrap();
    let removed = cache.invalidate(&InvalidationScope::Exact(CacheKey::from_request(&request)));
    assert_eq!(removed, 1);

    let after = cache.get(&request, origin.clone()).await.unwrap();
    assert!(!after.hit);
    cache.get(&request, origin.clone()).await.unwrap();
    assert_eq!(origin.calls(), 2);
}

#[tokio::test]
async fn prefix_invalidation_leaves_other_paths() {
    let cache = test_cache(Duration::from_secs(60));
    let origin = CountingOrigin::new(Duration::ZERO);
    for path in ["/feeds/areas", "/feeds/1", "/needs"] {
        cache.get(&RequestDescriptor::get(path), origin.clone()).await.unwrap();
    }

    assert_eq!(cache.invalidate(&InvalidationScope::path_prefix("/feeds")), 2);
    assert_eq!(cache.invalidate(&InvalidationScope::path_prefix("/feeds")), 0);
    assert!(cache
        .get(&RequestDescriptor::get("/needs"), origin.clone())
        .await
        .unwrap()
        .hit);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalidation_during_fetch_discards_its_result() {
    let cache = test_cache(Duration::from_secs(60));
    let request = RequestDescriptor::get("/feeds/areas");
    let release = Arc::new(Notify::new());
    let started = Arc::new(Notify::new());

    let waiter = {
        let cache = cache.clone();
        let request = request.clone();
        let release = release.clone();
        let started = started.clone();
        tokio::spawn(async move {
            cache
                .get_with(&request, move || async move {
                    started.notify_one();
                    release.notified().await;
                    Ok(OriginResponse::json("before-invalidation"))
                })
                .await
        })
    };

    started.notified().await;
    cache.invalidate(&InvalidationScope::All);
    release.notify_one();

    // the original waiter still gets its answer
    let read = waiter.await.unwrap().unwrap();
    assert_eq!(read.payload, "before-invalidation");

    // but it was never stored
    let next = cache
        .get_with(&request, || async { Ok(OriginResponse::json("after-invalidation")) })
        .await
        .unwrap();
    assert!(!next.hit);
    assert_eq!(next.payload, "after-invalidation");
}

#[tokio::test]
async fn origin_failure_reaches_all_waiters_and_stores_nothing() {
    let cache = test_cache(Duration::from_secs(60));
    let request = RequestDescriptor::get("/needs");

    let (a, b) = tokio::join!(
        cache.get_with(&request, || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err(OriginError::failed("connection refused"))
        }),
        cache.get_with(&request, || async { Ok(OriginResponse::json("unused")) }),
    );

    assert!(a.is_err());
    assert_eq!(a, b);
    assert_eq!(cache.stats().entries, 0);
    assert_eq!(cache.stats().origin_fetches, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capacity_bound_evicts_least_recently_used() {
    let cache = ResponseCache::in_memory(
        CacheConfig::new()
            .with_capacity(4)
            .with_shards(1)
            .with_sweep_interval(None),
    );
    let origin = CountingOrigin::new(Duration::ZERO);
    for i in 0..6 {
        cache
            .get(&RequestDescriptor::get(format!("/feeds/{}", i)), origin.clone())
            .await
            .unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.entries, 4);
    assert_eq!(stats.evictions, 2);

    let evicted = cache
        .get(&RequestDescriptor::get("/feeds/0"), origin.clone())
        .await
        .unwrap();
    assert!(!evicted.hit);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_served_entries_are_never_older_than_ttl(
        ttl_ms in 1u64..5_000,
        steps in proptest::collection::vec(0u64..3_000, 1..12),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        runtime.block_on(async {
            let ttl = Duration::from_millis(ttl_ms);
            let cache = test_cache(ttl);
            let request = RequestDescriptor::get("/feeds/areas");

            for step in steps {
                tokio::time::advance(Duration::from_millis(step)).await;
                let read = cache
                    .get_with(&request, || async { Ok(OriginResponse::json("[]")) })
                    .await
                    .unwrap();
                if read.hit {
                    prop_assert!(read.age < ttl);
                } else {
                    prop_assert_eq!(read.age, Duration::ZERO);
                }
            }
            Ok(())
        })?;
    }
}
