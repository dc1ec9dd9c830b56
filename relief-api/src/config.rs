//! API Configuration Module
//!
//! Server, cache, broker and rate-limit settings. Everything is loaded from
//! `RELIEF_*` environment variables with defaults suited to local runs;
//! production mode adds strict checks at startup.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use relief_core::ConfigError;
use relief_events::{AckPolicy, QueueConfig, DEFAULT_MAX_REPORT_BYTES};
use relief_storage::CacheConfig;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::InvalidValue {
                field: "RELIEF_ENVIRONMENT".to_string(),
                value: other.to_string(),
                reason: "expected development or production".to_string(),
            }),
        }
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for auth, rate limiting and request limits.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub environment: Environment,

    /// Keys accepted by the auth middleware on write and admin routes.
    pub api_keys: HashSet<String>,

    // ========================================================================
    // Rate Limiting Configuration
    // ========================================================================
    /// Whether rate limiting is enabled.
    pub rate_limit_enabled: bool,

    /// Requests per minute per client IP.
    pub rate_limit_per_minute: u32,

    /// Burst capacity (allow this many requests beyond the limit temporarily).
    pub rate_limit_burst: u32,

    /// Largest accepted report body.
    pub max_report_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Development,
            api_keys: HashSet::new(),
            rate_limit_enabled: true,
            rate_limit_per_minute: 600,
            rate_limit_burst: 50,
            max_report_bytes: DEFAULT_MAX_REPORT_BYTES,
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `RELIEF_ENVIRONMENT`: "development" or "production" (default: development)
    /// - `RELIEF_API_KEYS`: Comma-separated API keys (default: none)
    /// - `RELIEF_RATE_LIMIT_ENABLED`: "true" or "false" (default: true)
    /// - `RELIEF_RATE_LIMIT_PER_MINUTE`: Requests per minute per IP (default: 600)
    /// - `RELIEF_RATE_LIMIT_BURST`: Burst capacity (default: 50)
    /// - `RELIEF_MAX_REPORT_BYTES`: Report body limit (default: 65536)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let environment = match var("RELIEF_ENVIRONMENT") {
            Some(value) => value.parse()?,
            None => defaults.environment,
        };

        let api_keys = var("RELIEF_API_KEYS")
            .map(|s| {
                s.split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let rate_limit_enabled = var("RELIEF_RATE_LIMIT_ENABLED")
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.rate_limit_enabled);

        let rate_limit_per_minute = var("RELIEF_RATE_LIMIT_PER_MINUTE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.rate_limit_per_minute);

        let rate_limit_burst = var("RELIEF_RATE_LIMIT_BURST")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.rate_limit_burst);

        let max_report_bytes = var("RELIEF_MAX_REPORT_BYTES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_report_bytes);

        let config = Self {
            environment,
            api_keys,
            rate_limit_enabled,
            rate_limit_per_minute,
            rate_limit_burst,
            max_report_bytes,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Strict checks for production deployments.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.is_production() && self.api_keys.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "RELIEF_API_KEYS".to_string(),
            });
        }
        if self.max_report_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "RELIEF_MAX_REPORT_BYTES".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_keys.insert(key.into());
        self
    }

    pub fn is_valid_api_key(&self, key: &str) -> bool {
        self.api_keys.contains(key)
    }
}

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Build the response cache configuration from environment variables.
///
/// - `RELIEF_CACHE_TTL_SECS` (default: 60)
/// - `RELIEF_CACHE_CAPACITY` (default: 10000)
/// - `RELIEF_CACHE_SHARDS` (default: 16)
/// - `RELIEF_ORIGIN_TIMEOUT_MS` (default: 5000)
/// - `RELIEF_CACHE_SWEEP_SECS` (default: 30, 0 disables the sweep)
pub fn cache_config_from_env() -> CacheConfig {
    cache_config_from_lookup(|name| std::env::var(name).ok())
}

pub(crate) fn cache_config_from_lookup(var: impl Fn(&str) -> Option<String>) -> CacheConfig {
    let defaults = CacheConfig::default();

    let ttl = var("RELIEF_CACHE_TTL_SECS")
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(defaults.ttl);

    let capacity = var("RELIEF_CACHE_CAPACITY")
        .and_then(|s| s.parse().ok())
        .unwrap_or(defaults.capacity);

    let shards = var("RELIEF_CACHE_SHARDS")
        .and_then(|s| s.parse().ok())
        .unwrap_or(defaults.shards);

    let origin_timeout = var("RELIEF_ORIGIN_TIMEOUT_MS")
        .and_then(|s| s.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(defaults.origin_timeout);

    let sweep_interval = match var("RELIEF_CACHE_SWEEP_SECS").and_then(|s| s.parse::<u64>().ok()) {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => defaults.sweep_interval,
    };

    CacheConfig::new()
        .with_ttl(ttl)
        .with_capacity(capacity)
        .with_shards(shards)
        .with_origin_timeout(origin_timeout)
        .with_sweep_interval(sweep_interval)
}

// ============================================================================
// BROKER CONFIGURATION
// ============================================================================

/// Which producer backs the ingestion queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerKind {
    /// In-process partitioned log.
    Memory,
    /// HTTP Kafka REST proxy.
    Rest,
}

impl FromStr for BrokerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BrokerKind::Memory),
            "rest" | "rest-proxy" => Ok(BrokerKind::Rest),
            other => Err(ConfigError::InvalidValue {
                field: "RELIEF_BROKER".to_string(),
                value: other.to_string(),
                reason: "expected memory or rest".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub kind: BrokerKind,
    pub url: Option<String>,
    pub topic: String,
    /// Explicit `RELIEF_BROKER_ACKS`; unset means the queue default.
    pub acks: Option<AckPolicy>,
    pub partitions: usize,
    pub publish_timeout: Duration,
    pub max_retries: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let queue = QueueConfig::default();
        Self {
            kind: BrokerKind::Memory,
            url: None,
            topic: queue.topic,
            acks: None,
            partitions: 3,
            publish_timeout: queue.publish_timeout,
            max_retries: queue.max_retries,
        }
    }
}

impl BrokerConfig {
    /// Load broker settings.
    ///
    /// - `RELIEF_BROKER`: "memory" or "rest" (default: memory)
    /// - `RELIEF_BROKER_URL`: REST proxy base URL, required for "rest"
    /// - `RELIEF_BROKER_TOPIC` (default: events)
    /// - `RELIEF_BROKER_ACKS`: "leader" or "all" (default: all); the REST
    ///   proxy ignores it
    /// - `RELIEF_BROKER_PARTITIONS` (default: 3)
    /// - `RELIEF_PUBLISH_TIMEOUT_MS` (default: 10000)
    /// - `RELIEF_PUBLISH_MAX_RETRIES` (default: 2)
    ///
    /// Errors here put the write path into degraded mode; they never stop
    /// the read endpoints from serving.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let kind = match var("RELIEF_BROKER") {
            Some(value) => value.parse()?,
            None => defaults.kind,
        };
        let url = var("RELIEF_BROKER_URL").filter(|u| !u.trim().is_empty());
        if kind == BrokerKind::Rest && url.is_none() {
            return Err(ConfigError::MissingRequired {
                field: "RELIEF_BROKER_URL".to_string(),
            });
        }

        let acks = var("RELIEF_BROKER_ACKS")
            .map(|value| value.parse())
            .transpose()?;

        let topic = var("RELIEF_BROKER_TOPIC")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or(defaults.topic);

        let partitions = var("RELIEF_BROKER_PARTITIONS")
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(defaults.partitions);

        let publish_timeout = var("RELIEF_PUBLISH_TIMEOUT_MS")
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.publish_timeout);

        let max_retries = var("RELIEF_PUBLISH_MAX_RETRIES")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_retries);

        Ok(Self {
            kind,
            url,
            topic,
            acks,
            partitions,
            publish_timeout,
            max_retries,
        })
    }

    /// Queue settings for this broker. A single attempt never outlives the
    /// whole publish budget.
    pub fn queue_config(&self) -> QueueConfig {
        let defaults = QueueConfig::default();
        QueueConfig {
            topic: self.topic.clone(),
            ack: self.acks.unwrap_or(defaults.ack),
            attempt_timeout: defaults.attempt_timeout.min(self.publish_timeout),
            publish_timeout: self.publish_timeout,
            max_retries: self.max_retries,
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert_eq!(config.environment, Environment::Development);
        assert!(config.api_keys.is_empty());
        assert!(config.rate_limit_enabled);
        assert_eq!(config.rate_limit_per_minute, 600);
        assert_eq!(config.rate_limit_burst, 50);
        assert_eq!(config.max_report_bytes, 65536);
    }

    #[test]
    fn test_api_keys_parsing() {
        let config = ApiConfig::from_lookup(lookup(&[("RELIEF_API_KEYS", "alpha, beta,,")])).unwrap();
        assert_eq!(config.api_keys.len(), 2);
        assert!(config.is_valid_api_key("beta"));
        assert!(!config.is_valid_api_key(""));
    }

    #[test]
    fn test_production_requires_api_keys() {
        let err = ApiConfig::from_lookup(lookup(&[("RELIEF_ENVIRONMENT", "production")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));

        let config = ApiConfig::from_lookup(lookup(&[
            ("RELIEF_ENVIRONMENT", "production"),
            ("RELIEF_API_KEYS", "ops-key"),
        ]))
        .unwrap();
        assert!(config.is_production());
    }

    #[test]
    fn test_cache_config_from_env() {
        let config = cache_config_from_lookup(lookup(&[
            ("RELIEF_CACHE_TTL_SECS", "5"),
            ("RELIEF_CACHE_SWEEP_SECS", "0"),
            ("RELIEF_ORIGIN_TIMEOUT_MS", "250"),
        ]));
        assert_eq!(config.ttl, Duration::from_secs(5));
        assert_eq!(config.sweep_interval, None);
        assert_eq!(config.origin_timeout, Duration::from_millis(250));
        assert_eq!(config.capacity, 10_000);
    }

    #[test]
    fn test_broker_config() {
        let config = BrokerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.kind, BrokerKind::Memory);
        assert_eq!(config.acks, None);
        assert_eq!(config.queue_config().ack, AckPolicy::All);

        let config = BrokerConfig::from_lookup(lookup(&[("RELIEF_BROKER_ACKS", "1")])).unwrap();
        assert_eq!(config.acks, Some(AckPolicy::Leader));

        let err = BrokerConfig::from_lookup(lookup(&[("RELIEF_BROKER", "rest")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));

        let err = BrokerConfig::from_lookup(lookup(&[("RELIEF_BROKER_ACKS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_queue_config_respects_publish_budget() {
        let config = BrokerConfig {
            publish_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let queue = config.queue_config();
        assert!(queue.attempt_timeout <= queue.publish_timeout);
        assert_eq!(queue.topic, "events");
    }
}
