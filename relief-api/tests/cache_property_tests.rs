//! Property-Based Tests for the Cached Read Path
//!
//! **Property 1: Order-independent keys**
//!
//! For any set of query parameters, a read repeated with the parameters in
//! another order is answered from the cache without a second origin fetch.
//!
//! **Property 2: Writes without a valid key are rejected**
//!
//! For any API key outside the configured set, every write route answers
//! 401 and nothing reaches the broker.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use proptest::prelude::*;
use relief_api::{build_state, create_api_router, ApiConfig, AppState, X_CACHE};
use relief_events::{IngestionQueue, IngestionService, QueueConfig, ReportValidator};
use relief_storage::CacheConfig;
use relief_test_utils::{fixtures, generators, InMemoryBroker, TEST_API_KEY};
use tower::ServiceExt;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

fn test_app(broker: &InMemoryBroker) -> (Router, AppState) {
    let config = ApiConfig {
        rate_limit_enabled: false,
        ..Default::default()
    }
    .with_api_key(TEST_API_KEY);
    let queue = IngestionQueue::new(Arc::new(broker.clone()), QueueConfig::default());
    let ingestion = IngestionService::ready(queue, ReportValidator::default());
    let state = build_state(
        config,
        CacheConfig::default().with_sweep_interval(None),
        Arc::new(fixtures::seeded_repository()),
        ingestion,
    );
    (create_api_router(state.clone()), state)
}

fn query_string(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Strategy for keys that are never valid.
fn invalid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,40}".prop_filter("must differ from the test key", |k| k != TEST_API_KEY)
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_reordered_query_is_a_hit(pairs in generators::arb_query_pairs()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (app, state) = test_app(&InMemoryBroker::default());

            let forward = format!("/needs?{}", query_string(&pairs));
            let mut reversed_pairs = pairs.clone();
            reversed_pairs.reverse();
            let reversed = format!("/needs?{}", query_string(&reversed_pairs));

            let first = app
                .clone()
                .oneshot(Request::builder().uri(&forward).body(Body::empty()).unwrap())
                .await
                .unwrap();
            let first_status = first.status();

            let second = app
                .oneshot(Request::builder().uri(&reversed).body(Body::empty()).unwrap())
                .await
                .unwrap();
            prop_assert_eq!(second.status(), first_status);

            if first_status.is_success() {
                prop_assert_eq!(
                    second.headers().get(X_CACHE).and_then(|v| v.to_str().ok()),
                    Some("HIT")
                );
                prop_assert_eq!(state.cache.stats().origin_fetches, 1);
            }
            Ok(())
        })?;
    }

    #[test]
    fn prop_invalid_key_cannot_publish(key in invalid_key_strategy(), report in generators::arb_report()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let broker = InMemoryBroker::default();
            let (app, _state) = test_app(&broker);

            let request = Request::builder()
                .method("POST")
                .uri("/events")
                .header("x-api-key", key.as_str())
                .header("content-type", "application/json")
                .body(Body::from(report.to_string()))
                .unwrap();
            let response = app.oneshot(request).await.unwrap();

            prop_assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            prop_assert!(broker.is_empty());
            Ok(())
        })?;
    }

    #[test]
    fn prop_valid_report_is_published_once(report in generators::arb_report()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let broker = InMemoryBroker::default();
            let (app, _state) = test_app(&broker);

            let request = Request::builder()
                .method("POST")
                .uri("/events")
                .header("authorization", format!("Bearer {}", TEST_API_KEY))
                .header("content-type", "application/json")
                .body(Body::from(report.to_string()))
                .unwrap();
            let response = app.oneshot(request).await.unwrap();

            prop_assert_eq!(response.status(), StatusCode::ACCEPTED);
            prop_assert_eq!(broker.len(), 1);
            Ok(())
        })?;
    }
}
