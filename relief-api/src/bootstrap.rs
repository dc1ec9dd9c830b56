//! Startup wiring: producer selection and application state.

use std::sync::Arc;
use std::time::Duration;

use relief_core::ConfigError;
use relief_events::{
    EventProducer, InMemoryBroker, IngestionQueue, IngestionService, ReportValidator,
    RestProxyProducer,
};
use relief_storage::{CacheConfig, InMemoryRepository, ResponseCache};

use crate::config::{ApiConfig, BrokerConfig, BrokerKind};
use crate::state::{AppState, Repository};

/// Bound on one REST proxy round trip.
const PROXY_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the ingestion service for `broker`.
///
/// Settings that can never work yield a degraded service instead of an
/// error, so the read endpoints still come up. An unreachable proxy is only
/// logged: its client connects per request, and each publish reports the
/// outage until the proxy answers.
pub async fn build_ingestion_service(
    broker: Result<BrokerConfig, ConfigError>,
    validator: ReportValidator,
) -> IngestionService {
    let broker = match broker {
        Ok(broker) => broker,
        Err(e) => return degraded(format!("invalid broker configuration: {}", e), validator),
    };

    let producer: Arc<dyn EventProducer> = match broker.kind {
        BrokerKind::Memory => Arc::new(InMemoryBroker::new(broker.partitions)),
        BrokerKind::Rest => {
            let url = broker.url.as_deref().unwrap_or_default();
            let producer = match RestProxyProducer::new(url, PROXY_REQUEST_TIMEOUT) {
                Ok(producer) => producer,
                Err(e) => return degraded(e.to_string(), validator),
            };
            if let Err(e) = producer.ping().await {
                tracing::warn!(
                    url = %producer.base_url(),
                    error = %e,
                    "Broker proxy not reachable yet, publishes fail until it answers"
                );
            }
            if let Some(acks) = broker.acks {
                tracing::warn!(
                    acks = %acks,
                    "RELIEF_BROKER_ACKS is not applied through the REST proxy, its producer config decides"
                );
            }
            Arc::new(producer)
        }
    };

    let queue = IngestionQueue::new(producer, broker.queue_config());
    tracing::info!(
        producer = queue.producer_name(),
        topic = %queue.config().topic,
        acks = ?queue.ack_mode(),
        "Ingestion producer ready"
    );
    IngestionService::ready(queue, validator)
}

fn degraded(reason: String, validator: ReportValidator) -> IngestionService {
    tracing::error!(reason = %reason, "Ingestion producer unavailable, write path degraded");
    IngestionService::degraded(reason, validator)
}

/// Assemble the application state around an origin repository.
pub fn build_state(
    config: ApiConfig,
    cache_config: CacheConfig,
    repository: Repository,
    ingestion: IngestionService,
) -> AppState {
    let cache = ResponseCache::in_memory(cache_config);
    AppState::new(cache, repository, ingestion, config)
}

/// The origin store used when no external one is wired in.
pub fn default_repository() -> Repository {
    Arc::new(InMemoryRepository::new())
}
