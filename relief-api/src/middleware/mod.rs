//! Middleware modules for RELIEF API
//!
//! - `auth`: API-key authentication for write and admin routes
//! - `rate_limit`: per-client-IP rate limiting
//! - `cache`: read-through response cache for the read endpoints
//!
//! # Middleware Order
//!
//! ```ignore
//! Router::new()
//!     .merge(read_routes)   // response_cache_middleware as a route layer
//!     .merge(write_routes)  // auth_middleware as a route layer
//!     // Rate limiting runs before either
//!     .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
//!     // Outermost: observability and HTTP tracing
//! ```

mod auth;
mod cache;
mod rate_limit;

pub use auth::{auth_middleware, AuthContext, AuthExtractor, AuthMethod, AuthMiddlewareError};
pub use cache::{response_cache_middleware, X_CACHE};
pub use rate_limit::{
    rate_limit_middleware, RateLimitError, RateLimitState, RATE_LIMIT_PRUNE_INTERVAL,
};
