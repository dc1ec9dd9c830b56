//! RELIEF Events - report ingestion pipeline
//!
//! Write-path reports flow through this crate on their way to the broker:
//!
//! ```text
//! raw body -> ReportValidator -> IngestionEvent -> IngestionQueue -> EventProducer -> broker
//!                                                      ^                   |
//!                                                      +---- DeliveryAck --+
//! ```
//!
//! A report counts as accepted only after the broker acknowledged it under
//! the configured [`AckPolicy`]. Broker delivery is at-least-once; the
//! event id is the record key and the deduplication handle downstream.

mod event;
mod memory_broker;
mod producer;
mod queue;
mod rest_proxy;
mod service;
mod validation;

pub use event::{BrokerMessage, IngestionEvent};
pub use memory_broker::{InMemoryBroker, StoredRecord};
pub use producer::{AckMode, AckPolicy, DeliveryAck, EventProducer, ProducerError};
pub use queue::{IngestionQueue, PublishError, QueueConfig};
pub use rest_proxy::RestProxyProducer;
pub use service::{Accepted, IngestError, IngestionService, ProducerStatus};
pub use validation::{ReportValidator, DEFAULT_MAX_DEPTH, DEFAULT_MAX_REPORT_BYTES};
