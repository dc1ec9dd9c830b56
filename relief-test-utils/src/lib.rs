//! RELIEF Test Utilities
//!
//! Shared test infrastructure for the RELIEF workspace:
//! - A producer that never acknowledges
//! - Fixtures: sample feeds, areas and needs, a seeded repository
//! - Proptest generators for locations, queries and reports

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

pub use relief_core::{
    CreateNeedRequest, Feed, FeedArea, FeedAreaQuery, FeedLocationUpdate, Location, Need,
    NeedFilter, UpdateFeedLocationsRequest,
};
pub use relief_events::{
    AckPolicy, BrokerMessage, DeliveryAck, EventProducer, InMemoryBroker, ProducerError,
};
pub use relief_storage::InMemoryRepository;

/// API key accepted by test configurations.
pub const TEST_API_KEY: &str = "relief-test-key";

// ============================================================================
// MOCK PRODUCERS
// ============================================================================

/// Producer that never acknowledges: every send fails with the same error.
#[derive(Debug, Clone)]
pub struct FailingProducer {
    error: ProducerError,
    attempts: Arc<AtomicU64>,
}

impl FailingProducer {
    pub fn new(error: ProducerError) -> Self {
        Self {
            error,
            attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn unreachable() -> Self {
        Self::new(ProducerError::Unreachable {
            reason: "connection refused".to_string(),
        })
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventProducer for FailingProducer {
    async fn send(
        &self,
        _message: &BrokerMessage,
        _ack: AckPolicy,
    ) -> Result<DeliveryAck, ProducerError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use chrono::{TimeZone, Utc};

    /// Fixed instant so fixtures compare equal across runs.
    pub fn fixed_time() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 2, 6, 4, 17, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }

    pub fn sample_feed(id: i64) -> Feed {
        Feed {
            id,
            full_text: format!("Enkaz altinda kalanlar var, adres {}", id),
            is_resolved: false,
            channel: "twitter".to_string(),
            timestamp: fixed_time(),
            extra_parameters: None,
        }
    }

    pub fn sample_area(id: i64, latitude: f64, longitude: f64) -> FeedArea {
        FeedArea {
            id,
            location: Location::new(latitude, longitude),
            entry_id: Some(id * 10),
            timestamp: fixed_time(),
            reason: Some("enkaz".to_string()),
            channel: Some("twitter".to_string()),
        }
    }

    pub fn sample_need(id: i64, is_resolved: bool) -> Need {
        Need {
            id,
            description: "drinking water".to_string(),
            address: "Antakya, Hatay".to_string(),
            is_resolved,
            timestamp: fixed_time(),
            location: Some(Location::new(36.2, 36.16)),
        }
    }

    /// Box around Hatay and Kahramanmaras.
    pub fn region_query() -> FeedAreaQuery {
        FeedAreaQuery {
            sw_lat: 36.0,
            sw_lng: 35.5,
            ne_lat: 38.0,
            ne_lng: 37.5,
            timestamp: None,
            reason: None,
            channel: None,
        }
    }

    /// Repository with three feeds (two inside [`region_query`], one in
    /// Istanbul) and two needs, one of them resolved.
    pub fn seeded_repository() -> InMemoryRepository {
        let repository = InMemoryRepository::new();
        let feeds = [(1, 36.20, 36.16), (2, 37.58, 36.93), (3, 41.01, 28.97)];
        for (id, lat, lng) in feeds {
            // fresh repository, inserts cannot collide
            let _ = repository.insert_feed(sample_feed(id), sample_area(id, lat, lng));
        }
        let _ = repository.insert_need(sample_need(1, false));
        let _ = repository.insert_need(sample_need(2, true));
        repository
    }

    /// A report body the validator accepts.
    pub fn valid_report() -> serde_json::Value {
        serde_json::json!({
            "need": "tent",
            "address": "Kahramanmaras merkez",
            "location": {"latitude": 37.58, "longitude": 36.93}
        })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for RELIEF inputs.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_location() -> impl Strategy<Value = Location> {
        (-90.0f64..=90.0, -180.0f64..=180.0).prop_map(|(lat, lng)| Location::new(lat, lng))
    }

    /// Well-formed bounding boxes.
    pub fn arb_feed_area_query() -> impl Strategy<Value = FeedAreaQuery> {
        (arb_location(), arb_location()).prop_map(|(a, b)| FeedAreaQuery {
            sw_lat: a.latitude.min(b.latitude),
            sw_lng: a.longitude.min(b.longitude),
            ne_lat: a.latitude.max(b.latitude),
            ne_lng: a.longitude.max(b.longitude),
            timestamp: None,
            reason: None,
            channel: None,
        })
    }

    /// Query parameters with distinct keys.
    pub fn arb_query_pairs() -> impl Strategy<Value = Vec<(String, String)>> {
        proptest::collection::btree_map("[a-z_]{1,8}", "[a-zA-Z0-9 .&=-]{0,12}", 0..6)
            .prop_map(|map| map.into_iter().collect())
    }

    /// JSON objects the report validator accepts: non-blank string fields,
    /// shallow nesting.
    pub fn arb_report() -> impl Strategy<Value = serde_json::Value> {
        proptest::collection::btree_map("[a-z]{1,10}", "[a-zA-Z0-9]{1,20}", 1..6)
            .prop_filter("location must be an object", |fields| {
                !fields.contains_key("location")
            })
            .prop_map(
            |fields| {
                let map = fields
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect::<serde_json::Map<_, _>>();
                serde_json::Value::Object(map)
            },
        )
    }
}
