//! RELIEF API Server Entry Point
//!
//! Bootstraps configuration, the response cache and the ingestion producer,
//! then starts the Axum HTTP server.

use std::net::SocketAddr;

use relief_api::telemetry::{init_tracing, TelemetryConfig};
use relief_api::{
    build_ingestion_service, build_state, cache_config_from_env, create_api_router,
    default_repository, ApiConfig, ApiError, ApiResult, BrokerConfig, RATE_LIMIT_PRUNE_INTERVAL,
};
use relief_events::ReportValidator;

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let api_config = ApiConfig::from_env()?;
    let cache_config = cache_config_from_env();
    let validator = ReportValidator::new(api_config.max_report_bytes);

    // Broker problems degrade the write path; reads still start.
    let ingestion = build_ingestion_service(BrokerConfig::from_env(), validator).await;

    let state = build_state(api_config, cache_config, default_repository(), ingestion);
    let sweeper = state
        .cache
        .config()
        .sweep_interval
        .map(|interval| state.cache.spawn_sweeper(interval));
    let pruner = state
        .config
        .rate_limit_enabled
        .then(|| state.rate_limit.spawn_pruner(RATE_LIMIT_PRUNE_INTERVAL));

    let app = create_api_router(state);

    let addr = resolve_bind_addr()?;
    tracing::info!(%addr, "Starting RELIEF API server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;

    for task in sweeper.into_iter().chain(pruner) {
        task.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    tracing::info!("Shutdown signal received");
}

fn resolve_bind_addr() -> ApiResult<SocketAddr> {
    let host = std::env::var("RELIEF_API_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("RELIEF_API_PORT").ok())
        .unwrap_or_else(|| "3000".to_string());

    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
