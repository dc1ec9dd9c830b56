//! Ingestion events and the broker messages built from them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An accepted report on its way to the broker.
///
/// Built only from a validated payload and immutable afterwards. The `id`
/// is time-ordered (UUIDv7) and doubles as the broker message key, which
/// downstream consumers use to deduplicate at-least-once deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionEvent {
    id: Uuid,
    payload: serde_json::Value,
    received_at: DateTime<Utc>,
}

impl IngestionEvent {
    pub(crate) fn new(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            payload,
            received_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// Wrap the event for `topic`: key = event id, value = the serialized
    /// event.
    pub fn to_message(&self, topic: &str) -> Result<BrokerMessage, serde_json::Error> {
        let value = serde_json::to_vec(self)?;
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        headers.insert("event-id".to_string(), self.id.to_string());
        Ok(BrokerMessage {
            topic: topic.to_string(),
            key: self.id.to_string(),
            value,
            headers,
        })
    }
}

/// A keyed record as handed to a producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub key: String,
    pub value: Vec<u8>,
    pub headers: BTreeMap<String, String>,
}

impl BrokerMessage {
    /// Decode the value back into the event it carries.
    pub fn decode_event(&self) -> Result<IngestionEvent, serde_json::Error> {
        serde_json::from_slice(&self.value)
    }
}
