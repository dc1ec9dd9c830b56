//! Producer that publishes through an HTTP Kafka REST proxy.
//!
//! `POST {base}/topics/{topic}` with the JSON embedded format. The proxy
//! answers only after its own producer has the broker's acknowledgment, so
//! a 2xx response whose offset entry carries no error is the ack. The v2
//! produce API has no per-request acks field, so the replica requirement is
//! the proxy's `acks` producer setting and the requested [`AckPolicy`] is
//! not applied here.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::event::BrokerMessage;
use crate::producer::{AckPolicy, DeliveryAck, EventProducer, ProducerError};

const CONTENT_TYPE: &str = "application/vnd.kafka.json.v2+json";
const ACCEPT: &str = "application/vnd.kafka.v2+json";

#[derive(Debug, Serialize)]
struct ProduceRequest<'a> {
    records: [ProduceRecord<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ProduceRecord<'a> {
    key: &'a str,
    value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ProduceResponse {
    #[serde(default)]
    offsets: Vec<RecordOffset>,
}

#[derive(Debug, Deserialize)]
struct RecordOffset {
    partition: Option<i32>,
    offset: Option<i64>,
    error_code: Option<i64>,
    error: Option<String>,
}

/// [`EventProducer`] backed by a REST proxy.
#[derive(Debug, Clone)]
pub struct RestProxyProducer {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl RestProxyProducer {
    /// Build a producer for the proxy at `base_url`; `request_timeout`
    /// bounds each HTTP round trip.
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, ProducerError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ProducerError::NotInitialized {
                reason: format!("broker URL must be http(s), got '{}'", base_url),
            });
        }
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ProducerError::NotInitialized {
                reason: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url,
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check the proxy by listing topics.
    pub async fn ping(&self) -> Result<(), ProducerError> {
        let response = self
            .client
            .get(format!("{}/topics", self.base_url))
            .header("Accept", ACCEPT)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProducerError::Unreachable {
                reason: format!("proxy answered {}", response.status()),
            })
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> ProducerError {
        if e.is_timeout() {
            ProducerError::Timeout {
                after: self.request_timeout,
            }
        } else {
            ProducerError::Unreachable {
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl EventProducer for RestProxyProducer {
    async fn send(
        &self,
        message: &BrokerMessage,
        _ack: AckPolicy,
    ) -> Result<DeliveryAck, ProducerError> {
        let value: serde_json::Value =
            serde_json::from_slice(&message.value).map_err(|e| ProducerError::Rejected {
                reason: format!("record value is not JSON: {}", e),
            })?;
        let body = ProduceRequest {
            records: [ProduceRecord {
                key: &message.key,
                value,
            }],
        };

        let url = format!(
            "{}/topics/{}",
            self.base_url,
            urlencoding::encode(&message.topic)
        );
        tracing::trace!(%url, key = %message.key, "Producing record");

        let response = self
            .client
            .post(&url)
            .header("Content-Type", CONTENT_TYPE)
            .header("Accept", ACCEPT)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ProducerError::Unreachable {
                reason: format!("proxy answered {}", status),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProducerError::Rejected {
                reason: format!("proxy answered {}: {}", status, text),
            });
        }

        let parsed: ProduceResponse = response.json().await.map_err(|e| {
            ProducerError::Unreachable {
                reason: format!("unreadable proxy response: {}", e),
            }
        })?;
        let record = parsed
            .offsets
            .into_iter()
            .next()
            .ok_or_else(|| ProducerError::Unreachable {
                reason: "proxy response carried no offsets".to_string(),
            })?;

        if let Some(code) = record.error_code {
            let reason = record.error.unwrap_or_else(|| format!("error code {}", code));
            // 5xxxx codes are the proxy's retriable class
            return Err(if code >= 50000 {
                ProducerError::Unreachable { reason }
            } else {
                ProducerError::Rejected { reason }
            });
        }

        match (record.partition, record.offset) {
            (Some(partition), Some(offset)) => Ok(DeliveryAck { partition, offset }),
            _ => Err(ProducerError::Unreachable {
                reason: "proxy response carried no offset".to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "rest-proxy"
    }

    fn applies_ack_policy(&self) -> bool {
        false
    }
}
