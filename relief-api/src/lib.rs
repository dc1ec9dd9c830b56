//! RELIEF API - HTTP layer of the disaster-response data service
//!
//! Read endpoints for feed areas, feeds and needs are served through a
//! single-flight response cache; incident and need reports are validated
//! and handed to a message broker before the request is acknowledged.

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod macros;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use bootstrap::{build_ingestion_service, build_state, default_repository};
pub use config::{cache_config_from_env, ApiConfig, BrokerConfig, BrokerKind, Environment};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{
    AuthContext, AuthExtractor, RateLimitState, RATE_LIMIT_PRUNE_INTERVAL, X_CACHE,
};
pub use routes::create_api_router;
pub use state::{ApiCache, AppState, Repository};
