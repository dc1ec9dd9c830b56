//! Ingestion queue client: durable handoff of events to the broker.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::event::IngestionEvent;
use crate::producer::{AckMode, AckPolicy, DeliveryAck, EventProducer, ProducerError};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub topic: String,
    pub ack: AckPolicy,
    /// Bound on a single send attempt.
    pub attempt_timeout: Duration,
    /// Bound on the whole publish, retries and backoff included.
    pub publish_timeout: Duration,
    /// Resends after the first attempt, for transient failures only.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            topic: "events".to_string(),
            ack: AckPolicy::All,
            attempt_timeout: Duration::from_secs(3),
            publish_timeout: Duration::from_secs(10),
            max_retries: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("Broker unavailable after {attempts} attempt(s): {reason}")]
    BrokerUnavailable { reason: String, attempts: u32 },

    #[error("Broker rejected event: {reason}")]
    Rejected { reason: String },

    #[error("Event could not be encoded: {reason}")]
    Encode { reason: String },
}

/// Publishes events through an [`EventProducer`] and waits for the ack.
///
/// Every attempt for one event sends the same record under the same key,
/// so a resend after a lost acknowledgment is a duplicate consumers can
/// drop by event id.
#[derive(Clone)]
pub struct IngestionQueue {
    producer: Arc<dyn EventProducer>,
    config: QueueConfig,
}

impl IngestionQueue {
    pub fn new(producer: Arc<dyn EventProducer>, config: QueueConfig) -> Self {
        Self { producer, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn producer_name(&self) -> &'static str {
        self.producer.name()
    }

    /// The acknowledgment level publishes really wait for.
    pub fn ack_mode(&self) -> AckMode {
        if self.producer.applies_ack_policy() {
            self.config.ack.into()
        } else {
            AckMode::ProxyConfigured
        }
    }

    /// Publish `event`, returning its position once the broker has
    /// acknowledged it under the configured policy.
    pub async fn publish(&self, event: &IngestionEvent) -> Result<DeliveryAck, PublishError> {
        let message = event
            .to_message(&self.config.topic)
            .map_err(|e| PublishError::Encode {
                reason: e.to_string(),
            })?;

        let deadline = Instant::now() + self.config.publish_timeout;
        let mut backoff = self.config.initial_backoff;
        let mut attempts = 0u32;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(self.unavailable(
                    event,
                    format!("publish timed out after {:?}", self.config.publish_timeout),
                    attempts,
                ));
            }
            attempts += 1;

            let budget = self.config.attempt_timeout.min(remaining);
            let result = match tokio::time::timeout(
                budget,
                self.producer.send(&message, self.config.ack),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ProducerError::Timeout { after: budget }),
            };

            match result {
                Ok(ack) => {
                    tracing::debug!(
                        event_id = %event.id(),
                        partition = ack.partition,
                        offset = ack.offset,
                        attempts,
                        "Event acknowledged"
                    );
                    return Ok(ack);
                }
                Err(e) if !e.is_transient() => {
                    tracing::error!(event_id = %event.id(), error = %e, "Broker rejected event");
                    return Err(PublishError::Rejected {
                        reason: e.to_string(),
                    });
                }
                Err(e) if attempts > self.config.max_retries => {
                    return Err(self.unavailable(event, e.to_string(), attempts));
                }
                Err(e) => {
                    tracing::warn!(
                        event_id = %event.id(),
                        error = %e,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "Publish attempt failed, retrying"
                    );
                    let wake = (Instant::now() + backoff).min(deadline);
                    tokio::time::sleep_until(wake).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
            }
        }
    }

    fn unavailable(&self, event: &IngestionEvent, reason: String, attempts: u32) -> PublishError {
        tracing::error!(
            event_id = %event.id(),
            producer = self.producer.name(),
            attempts,
            reason = %reason,
            "Broker unavailable, event not published"
        );
        PublishError::BrokerUnavailable { reason, attempts }
    }
}
