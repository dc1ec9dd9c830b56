//! Broker producer contract.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use relief_core::ConfigError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::BrokerMessage;

/// How many replicas must persist a record before the broker acknowledges.
///
/// There is no fire-and-forget variant: an unacknowledged send cannot back
/// a durable handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckPolicy {
    /// The partition leader has written the record.
    Leader,
    /// All in-sync replicas have written the record.
    All,
}

impl AckPolicy {
    /// Value of the broker's `acks` setting.
    pub fn as_acks(&self) -> &'static str {
        match self {
            AckPolicy::Leader => "1",
            AckPolicy::All => "all",
        }
    }
}

impl fmt::Display for AckPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckPolicy::Leader => write!(f, "leader"),
            AckPolicy::All => write!(f, "all"),
        }
    }
}

impl FromStr for AckPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "leader" | "1" => Ok(AckPolicy::Leader),
            "all" | "-1" => Ok(AckPolicy::All),
            "0" | "none" => Err(ConfigError::InvalidValue {
                field: "acks".to_string(),
                value: s.to_string(),
                reason: "fire-and-forget publishing is not durable".to_string(),
            }),
            _ => Err(ConfigError::InvalidValue {
                field: "acks".to_string(),
                value: s.to_string(),
                reason: "expected leader|1 or all|-1".to_string(),
            }),
        }
    }
}

/// Broker acknowledgment for one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAck {
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProducerError {
    #[error("Broker unreachable: {reason}")]
    Unreachable { reason: String },

    #[error("Broker did not acknowledge within {after:?}")]
    Timeout { after: Duration },

    #[error("Broker rejected record: {reason}")]
    Rejected { reason: String },

    #[error("Producer not initialized: {reason}")]
    NotInitialized { reason: String },
}

impl ProducerError {
    /// Whether resending the same record could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProducerError::Unreachable { .. } | ProducerError::Timeout { .. }
        )
    }
}

/// Sends keyed records to a broker and waits for the acknowledgment.
#[async_trait]
pub trait EventProducer: Send + Sync {
    /// Send one record, resolving once the broker acknowledged it under
    /// `ack`.
    async fn send(
        &self,
        message: &BrokerMessage,
        ack: AckPolicy,
    ) -> Result<DeliveryAck, ProducerError>;

    /// Short name for logs and health output.
    fn name(&self) -> &'static str;

    /// Whether `send` enforces the requested [`AckPolicy`] itself. When
    /// false the replica requirement is whatever the broker-side producer
    /// is configured with.
    fn applies_ack_policy(&self) -> bool {
        true
    }
}

/// Acknowledgment level a ready producer actually publishes under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckMode {
    Leader,
    All,
    /// Decided by the proxy's own producer settings.
    ProxyConfigured,
}

impl From<AckPolicy> for AckMode {
    fn from(policy: AckPolicy) -> Self {
        match policy {
            AckPolicy::Leader => AckMode::Leader,
            AckPolicy::All => AckMode::All,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ack_policy() {
        assert_eq!("leader".parse::<AckPolicy>().unwrap(), AckPolicy::Leader);
        assert_eq!("1".parse::<AckPolicy>().unwrap(), AckPolicy::Leader);
        assert_eq!("ALL".parse::<AckPolicy>().unwrap(), AckPolicy::All);
        assert_eq!("-1".parse::<AckPolicy>().unwrap(), AckPolicy::All);
    }

    #[test]
    fn test_fire_and_forget_rejected() {
        let err = "0".parse::<AckPolicy>().unwrap_err();
        assert!(err.to_string().contains("not durable"));
        assert!("maybe".parse::<AckPolicy>().is_err());
    }

    #[test]
    fn test_transient_errors() {
        assert!(ProducerError::Timeout {
            after: Duration::from_secs(1)
        }
        .is_transient());
        assert!(!ProducerError::Rejected {
            reason: "record too large".to_string()
        }
        .is_transient());
    }
}
