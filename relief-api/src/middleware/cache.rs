//! Response cache middleware for the read endpoints.
//!
//! GET requests are keyed by method, path and query and answered from the
//! shared [`ResponseCache`](relief_storage::ResponseCache). On a miss the
//! downstream handler is the origin: it runs once per key no matter how
//! many requests arrive while it is in flight, and its buffered response is
//! stored when it is a 2xx.
//!
//! Handlers can shorten freshness with `Cache-Control: max-age=N` or opt out
//! with `no-store`. A 5xx from the handler is an origin failure and is
//! answered as `ORIGIN_UNAVAILABLE`.

use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use relief_storage::{OriginError, OriginResponse, RequestDescriptor};

use crate::error::ApiError;
use crate::state::ApiCache;
use crate::telemetry::{normalize_path, with_metrics, CacheOutcome};

/// Header telling clients whether the payload came from the cache.
pub const X_CACHE: &str = "x-cache";

/// Largest handler response the cache buffers.
const MAX_CACHED_BODY: usize = 8 * 1024 * 1024;

pub async fn response_cache_middleware(
    State(cache): State<ApiCache>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let descriptor = RequestDescriptor::from_parts(
        request.method().as_str(),
        request.uri().path(),
        request.uri().query(),
    );

    match cache
        .get_with(&descriptor, move || fetch_from_handler(next, request))
        .await
    {
        Ok(read) => {
            with_metrics(|m| {
                m.record_cache_lookup(if read.hit {
                    CacheOutcome::Hit
                } else {
                    CacheOutcome::Miss
                })
            });

            let status = StatusCode::from_u16(read.status).unwrap_or(StatusCode::OK);
            let mut response = (status, Body::from(read.payload)).into_response();
            let headers = response.headers_mut();
            if let Some(value) = read
                .content_type
                .as_deref()
                .and_then(|ct| HeaderValue::from_str(ct).ok())
            {
                headers.insert(header::CONTENT_TYPE, value);
            }
            headers.insert(
                X_CACHE,
                HeaderValue::from_static(if read.hit { "HIT" } else { "MISS" }),
            );
            if read.hit {
                headers.insert(header::AGE, HeaderValue::from(read.age.as_secs()));
            }
            response
        }
        Err(e) => {
            with_metrics(|m| m.record_cache_lookup(CacheOutcome::Error));
            ApiError::from(e).into_response()
        }
    }
}

/// Run the downstream handler and buffer its response for the cache.
async fn fetch_from_handler(next: Next, request: Request) -> Result<OriginResponse, OriginError> {
    let route = normalize_path(request.uri().path());
    let started = Instant::now();

    let response = next.run(request).await;
    let (parts, body) = response.into_parts();
    let elapsed = started.elapsed();
    with_metrics(|m| m.record_origin_fetch(&route, elapsed.as_secs_f64()));

    if parts.status.is_server_error() {
        return Err(OriginError::failed(format!(
            "{} answered {}",
            route, parts.status
        )));
    }

    let payload = axum::body::to_bytes(body, MAX_CACHED_BODY)
        .await
        .map_err(|e| OriginError::failed(format!("failed to buffer {}: {}", route, e)))?;

    let mut origin = OriginResponse::new(parts.status.as_u16(), payload);
    if let Some(content_type) = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        origin = origin.with_content_type(content_type);
    }
    if let Some(max_age) = max_age(&parts.headers) {
        origin = origin.with_max_age(max_age);
    }
    Ok(origin)
}

/// Freshness hint from `Cache-Control`. `no-store` and `no-cache` count as
/// a zero lifetime.
fn max_age(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(header::CACHE_CONTROL)?.to_str().ok()?;
    let mut found = None;
    for directive in value.split(',').map(str::trim) {
        let directive = directive.to_ascii_lowercase();
        if directive == "no-store" || directive == "no-cache" {
            return Some(Duration::ZERO);
        }
        if let Some(secs) = directive.strip_prefix("max-age=") {
            found = secs.trim().parse().ok().map(Duration::from_secs);
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use relief_storage::{CacheConfig, ResponseCache};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app(cache: ApiCache, calls: Arc<AtomicU64>) -> Router {
        let counted = move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                ([(header::CONTENT_TYPE, "application/json")], format!("{{\"call\":{}}}", n))
            }
        };
        Router::new()
            .route("/items", get(counted))
            .route(
                "/short",
                get(|| async { ([(header::CACHE_CONTROL, "max-age=0")], "short") }),
            )
            .route(
                "/broken",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            )
            .layer(middleware::from_fn_with_state(cache, response_cache_middleware))
    }

    async fn get_uri(app: &Router, uri: &str) -> Result<Response, String> {
        let request = axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .map_err(|e| e.to_string())?;
        app.clone()
            .oneshot(request)
            .await
            .map_err(|e| format!("{:?}", e))
    }

    fn x_cache(response: &Response) -> Option<&str> {
        response.headers().get(X_CACHE).and_then(|v| v.to_str().ok())
    }

    #[tokio::test]
    async fn test_second_read_is_a_hit() -> Result<(), String> {
        let calls = Arc::new(AtomicU64::new(0));
        let app = app(ResponseCache::in_memory(CacheConfig::default()), calls.clone());

        let first = get_uri(&app, "/items?b=2&a=1").await?;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(x_cache(&first), Some("MISS"));

        let second = get_uri(&app, "/items?a=1&b=2").await?;
        assert_eq!(x_cache(&second), Some("HIT"));
        assert_eq!(
            second.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
        let body = axum::body::to_bytes(second.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        assert_eq!(&body[..], br#"{"call":1}"#);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_zero_max_age_is_not_stored() -> Result<(), String> {
        let app = app(
            ResponseCache::in_memory(CacheConfig::default()),
            Arc::new(AtomicU64::new(0)),
        );
        get_uri(&app, "/short").await?;
        let again = get_uri(&app, "/short").await?;
        assert_eq!(x_cache(&again), Some("MISS"));
        Ok(())
    }

    #[tokio::test]
    async fn test_handler_error_is_origin_unavailable() -> Result<(), String> {
        let cache = ResponseCache::in_memory(CacheConfig::default());
        let app = app(cache.clone(), Arc::new(AtomicU64::new(0)));
        let response = get_uri(&app, "/broken").await?;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        let json: serde_json::Value = serde_json::from_slice(&body).map_err(|e| e.to_string())?;
        assert_eq!(json["code"], "ORIGIN_UNAVAILABLE");
        assert_eq!(cache.stats().entries, 0);
        Ok(())
    }

    #[test]
    fn test_max_age_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(max_age(&headers), None);

        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=30"));
        assert_eq!(max_age(&headers), Some(Duration::from_secs(30)));

        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        assert_eq!(max_age(&headers), Some(Duration::ZERO));
    }
}
