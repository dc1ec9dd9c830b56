//! Event ingestion endpoint logic: validate, build the event, publish.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use relief_core::ValidationError;

use crate::event::IngestionEvent;
use crate::producer::AckMode;
use crate::queue::{IngestionQueue, PublishError};
use crate::validation::ReportValidator;

/// Receipt for an accepted report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub event_id: Uuid,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("Invalid report: {0}")]
    Validation(#[from] ValidationError),

    #[error("Broker unavailable: {reason}")]
    BrokerUnavailable { reason: String },
}

impl From<PublishError> for IngestError {
    fn from(e: PublishError) -> Self {
        IngestError::BrokerUnavailable {
            reason: e.to_string(),
        }
    }
}

/// Producer state as reported by health checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProducerStatus {
    Ready {
        producer: &'static str,
        topic: String,
        acks: AckMode,
    },
    Degraded {
        reason: String,
    },
}

impl ProducerStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProducerStatus::Ready { .. })
    }
}

enum Backend {
    Ready(IngestionQueue),
    Degraded(String),
}

/// Accepts raw reports and hands them to the broker.
///
/// Built either around a working queue or, when the producer failed to
/// start, in degraded mode: reports are still validated, but every valid
/// one is answered with [`IngestError::BrokerUnavailable`].
pub struct IngestionService {
    validator: ReportValidator,
    backend: Backend,
}

impl IngestionService {
    pub fn ready(queue: IngestionQueue, validator: ReportValidator) -> Self {
        Self {
            validator,
            backend: Backend::Ready(queue),
        }
    }

    pub fn degraded(reason: impl Into<String>, validator: ReportValidator) -> Self {
        Self {
            validator,
            backend: Backend::Degraded(reason.into()),
        }
    }

    pub fn validator(&self) -> &ReportValidator {
        &self.validator
    }

    pub fn status(&self) -> ProducerStatus {
        match &self.backend {
            Backend::Ready(queue) => ProducerStatus::Ready {
                producer: queue.producer_name(),
                topic: queue.config().topic.clone(),
                acks: queue.ack_mode(),
            },
            Backend::Degraded(reason) => ProducerStatus::Degraded {
                reason: reason.clone(),
            },
        }
    }

    /// Validate `raw`, publish it as a new event and return the receipt.
    /// Succeeds only once the broker has acknowledged the event.
    pub async fn submit(&self, raw: &[u8]) -> Result<Accepted, IngestError> {
        let payload = self.validator.validate(raw)?;

        let queue = match &self.backend {
            Backend::Ready(queue) => queue,
            Backend::Degraded(reason) => {
                return Err(IngestError::BrokerUnavailable {
                    reason: format!("producer not initialized: {}", reason),
                })
            }
        };

        let event = IngestionEvent::new(payload);
        let ack = queue.publish(&event).await?;
        tracing::info!(
            event_id = %event.id(),
            partition = ack.partition,
            offset = ack.offset,
            "Report accepted"
        );
        Ok(Accepted {
            event_id: event.id(),
            partition: ack.partition,
            offset: ack.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_broker::InMemoryBroker;
    use crate::producer::AckPolicy;
    use crate::queue::QueueConfig;
    use std::sync::Arc;
    use std::time::Duration;

    fn service(broker: &InMemoryBroker) -> IngestionService {
        let queue = IngestionQueue::new(Arc::new(broker.clone()), QueueConfig::default());
        IngestionService::ready(queue, ReportValidator::default())
    }

    #[tokio::test]
    async fn test_submit_publishes_one_keyed_message() {
        let broker = InMemoryBroker::new(3);
        let accepted = service(&broker)
            .submit(br#"{"need":" water ","address":"Iskenderun"}"#)
            .await
            .unwrap();

        let records = broker.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message.key, accepted.event_id.to_string());
        assert_eq!(records[0].offset, accepted.offset);

        let event = records[0].message.decode_event().unwrap();
        assert_eq!(event.payload()["need"], "water");
    }

    #[tokio::test]
    async fn test_invalid_report_never_reaches_broker() {
        let broker = InMemoryBroker::new(1);
        let err = service(&broker).submit(b"[]").await.unwrap_err();
        assert!(matches!(err, IngestError::Validation(_)));
        assert!(broker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_broker_timeout_fails_submit() {
        let broker = InMemoryBroker::new(1);
        broker.set_latency(Duration::from_secs(120));
        let err = service(&broker).submit(br#"{"need":"tent"}"#).await.unwrap_err();
        assert!(matches!(err, IngestError::BrokerUnavailable { .. }));
        assert!(broker.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_service() {
        let service = IngestionService::degraded("proxy unreachable", ReportValidator::default());
        assert!(!service.status().is_ready());
        assert!(matches!(
            service.submit(br#"{"need":"tent"}"#).await,
            Err(IngestError::BrokerUnavailable { .. })
        ));
        assert!(matches!(
            service.submit(b"").await,
            Err(IngestError::Validation(ValidationError::EmptyPayload))
        ));
    }

    #[test]
    fn test_ready_status_reports_configured_acks() {
        let broker = InMemoryBroker::new(1);
        let queue = IngestionQueue::new(
            Arc::new(broker),
            QueueConfig {
                ack: AckPolicy::Leader,
                ..Default::default()
            },
        );
        let status = IngestionService::ready(queue, ReportValidator::default()).status();
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "ready");
        assert_eq!(json["acks"], "leader");
    }

    #[test]
    fn test_status_serializes_with_tag() {
        let status = ProducerStatus::Degraded {
            reason: "down".to_string(),
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "degraded");
    }
}
