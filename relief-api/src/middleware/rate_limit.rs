//! Per-client-IP rate limiting.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header::HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ApiConfig;
use crate::error::ApiError;

type KeyedRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// How often idle client entries are dropped from the limiter.
pub const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Shared limiter state, keyed by client IP.
#[derive(Clone)]
pub struct RateLimitState {
    config: Arc<ApiConfig>,
    limiter: Arc<KeyedRateLimiter>,
}

impl RateLimitState {
    pub fn new(config: Arc<ApiConfig>) -> Self {
        let quota = Quota::per_minute(
            NonZeroU32::new(config.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.rate_limit_burst).unwrap_or(NonZeroU32::MIN));
        Self::with_quota(config, quota)
    }

    pub(crate) fn with_quota(config: Arc<ApiConfig>, quota: Quota) -> Self {
        Self {
            config,
            limiter: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.limiter.len()
    }

    /// Forget clients whose quota has fully replenished. Returns how many
    /// were dropped.
    pub fn prune(&self) -> usize {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        before.saturating_sub(self.limiter.len())
    }

    /// Start the background prune. The task runs until the handle is
    /// aborted or the runtime shuts down.
    pub fn spawn_pruner(&self, interval: Duration) -> JoinHandle<()> {
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let pruned = state.prune();
                if pruned > 0 {
                    tracing::debug!(pruned, "Pruned idle rate limit entries");
                }
            }
        })
    }
}

/// Error type for rate limit middleware.
pub struct RateLimitError {
    /// Seconds until the next request would be admitted
    pub retry_after: u64,
}

impl IntoResponse for RateLimitError {
    fn into_response(self) -> Response {
        let error = ApiError::too_many_requests(Some(self.retry_after));
        let mut response = (StatusCode::TOO_MANY_REQUESTS, axum::Json(error)).into_response();
        response.headers_mut().insert(
            HeaderName::from_static("retry-after"),
            HeaderValue::from_str(&self.retry_after.to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("60")),
        );
        response
    }
}

/// Extract client IP from request, considering proxy headers.
fn extract_client_ip(request: &Request, fallback: Option<SocketAddr>) -> IpAddr {
    // X-Forwarded-For can contain multiple IPs, the first is the client
    if let Some(forwarded_for) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
    {
        if let Some(first_ip) = forwarded_for.split(',').next() {
            if let Ok(ip) = first_ip.trim().parse() {
                return ip;
            }
        }
    }

    if let Some(real_ip) = request
        .headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
    {
        if let Ok(ip) = real_ip.trim().parse() {
            return ip;
        }
    }

    fallback
        .map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Rate limiting middleware.
///
/// Requests beyond the per-IP quota get 429 with a `retry-after` header.
/// The connection address is read from `ConnectInfo` when the server was
/// started with it, so routers served without it still work.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitError> {
    if !state.config.rate_limit_enabled {
        return Ok(next.run(request).await);
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = extract_client_ip(&request, peer);

    match state.limiter.check_key(&ip) {
        Ok(_) => {
            let mut response = next.run(request).await;
            response.headers_mut().insert(
                HeaderName::from_static("x-ratelimit-limit"),
                HeaderValue::from_str(&state.config.rate_limit_per_minute.to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("600")),
            );
            Ok(response)
        }
        Err(not_until) => {
            let retry_after = not_until
                .wait_time_from(governor::clock::Clock::now(&DefaultClock::default()))
                .as_secs()
                .max(1);
            tracing::warn!(client_ip = %ip, retry_after, "Rate limit exceeded");
            Err(RateLimitError { retry_after })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::Request,
        middleware,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    fn test_app(per_minute: u32, burst: u32) -> Router {
        let config = ApiConfig {
            rate_limit_per_minute: per_minute,
            rate_limit_burst: burst,
            ..Default::default()
        };
        let state = RateLimitState::new(Arc::new(config));
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state, rate_limit_middleware))
    }

    fn request_from(ip: &str) -> Result<Request<Body>, String> {
        Request::builder()
            .uri("/")
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .map_err(|e| e.to_string())
    }

    #[tokio::test]
    async fn test_burst_then_limited() -> Result<(), String> {
        let app = test_app(1, 2);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request_from("10.0.0.1")?)
                .await
                .map_err(|e| format!("{:?}", e))?;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().contains_key("x-ratelimit-limit"));
        }

        let response = app
            .clone()
            .oneshot(request_from("10.0.0.1")?)
            .await
            .map_err(|e| format!("{:?}", e))?;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or("missing retry-after")?;
        assert!(retry_after >= 1);

        // other clients have their own quota
        let response = app
            .oneshot(request_from("10.0.0.2")?)
            .await
            .map_err(|e| format!("{:?}", e))?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn test_disabled_rate_limit() -> Result<(), String> {
        let config = ApiConfig {
            rate_limit_enabled: false,
            rate_limit_per_minute: 1,
            rate_limit_burst: 1,
            ..Default::default()
        };
        let state = RateLimitState::new(Arc::new(config));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware));

        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(request_from("10.0.0.3")?)
                .await
                .map_err(|e| format!("{:?}", e))?;
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(state.tracked_clients(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_idle_clients_are_pruned() -> Result<(), String> {
        let quota = Quota::with_period(Duration::from_millis(200))
            .ok_or("zero period")?
            .allow_burst(NonZeroU32::MIN);
        let state = RateLimitState::with_quota(Arc::new(ApiConfig::default()), quota);
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware));

        for ip in ["10.0.1.1", "10.0.1.2", "10.0.1.3"] {
            let response = app
                .clone()
                .oneshot(request_from(ip)?)
                .await
                .map_err(|e| format!("{:?}", e))?;
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(state.tracked_clients(), 3);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(state.prune(), 3);
        assert_eq!(state.tracked_clients(), 0);
        Ok(())
    }

    #[test]
    fn test_extract_client_ip_order() -> Result<(), String> {
        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-real-ip", "198.51.100.1")
            .body(Body::empty())
            .map_err(|e| e.to_string())?;
        assert_eq!(
            extract_client_ip(&request, None),
            "203.0.113.7".parse::<IpAddr>().map_err(|e| e.to_string())?
        );

        let request = Request::builder()
            .body(Body::empty())
            .map_err(|e| e.to_string())?;
        let peer: SocketAddr = "192.0.2.9:4000".parse().map_err(|e| format!("{:?}", e))?;
        assert_eq!(extract_client_ip(&request, Some(peer)), peer.ip());
        Ok(())
    }
}
