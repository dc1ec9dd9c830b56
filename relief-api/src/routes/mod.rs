//! REST API Routes Module
//!
//! - Read endpoints (feed areas, feeds, needs) behind the response cache
//! - Write endpoints (feed location updates, needs, event reports) behind
//!   API-key auth
//! - Cache administration (prune) behind API-key auth
//! - Health checks and Prometheus metrics, outside auth and rate limiting

pub mod caches;
pub mod events;
pub mod feeds;
pub mod health;
pub mod needs;

use axum::{
    extract::DefaultBodyLimit,
    http::Uri,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, patch, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::middleware::{auth_middleware, rate_limit_middleware, response_cache_middleware};
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

/// Read routes, answered through the response cache.
fn read_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/feeds/areas", get(feeds::list_feed_areas))
        .route("/feeds/:id", get(feeds::get_feed))
        .route("/feeds/:id/", get(feeds::get_feed))
        .route("/needs", get(needs::list_needs))
        .route_layer(from_fn_with_state(state.clone(), response_cache_middleware))
}

/// Authenticated write and admin routes.
fn write_router(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/feeds/areas", patch(feeds::update_feed_locations))
        .route("/needs", post(needs::create_need))
        .route(
            "/events",
            post(events::submit_event)
                .layer(DefaultBodyLimit::max(state.config.max_report_bytes)),
        )
        .route("/caches/prune", get(caches::prune_cache))
        .route_layer(from_fn_with_state(state.clone(), auth_middleware))
}

/// Operational routes, exempt from rate limiting.
fn ops_router() -> Router<AppState> {
    Router::new()
        .route("/healthcheck", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/metrics", get(metrics_handler))
}

async fn route_not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("No route for {}", uri.path()))
}

/// Build the full application router.
pub fn create_api_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(read_router(&state))
        .merge(write_router(&state))
        .route_layer(from_fn_with_state(state.clone(), rate_limit_middleware));

    Router::new()
        .merge(api)
        .merge(ops_router())
        .fallback(route_not_found)
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
