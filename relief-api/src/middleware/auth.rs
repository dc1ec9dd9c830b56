//! Axum Middleware for API-key Authentication
//!
//! Write and admin routes require a key, sent either as `x-api-key` or as
//! `Authorization: Bearer <key>`. On success an [`AuthContext`] is injected
//! into request extensions; otherwise the request is answered with 401.
//! The identity provider issuing keys lives outside this service; the
//! accepted key set comes from configuration.

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::ApiConfig;
use crate::error::ApiError;

/// How the caller presented its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKeyHeader,
    Bearer,
}

/// Authenticated caller, as seen by handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// Last characters of the key, safe to log.
    pub key_hint: String,
    pub method: AuthMethod,
}

impl AuthContext {
    fn new(key: &str, method: AuthMethod) -> Self {
        let hint_start = key
            .char_indices()
            .rev()
            .nth(3)
            .map(|(i, _)| i)
            .unwrap_or(0);
        Self {
            key_hint: format!("...{}", &key[hint_start..]),
            method,
        }
    }
}

/// Resolve credentials from the raw header values.
fn authenticate(
    config: &ApiConfig,
    api_key_header: Option<&str>,
    auth_header: Option<&str>,
) -> Result<AuthContext, ApiError> {
    let (key, method) = match (api_key_header, auth_header) {
        (Some(key), _) => (key.trim(), AuthMethod::ApiKeyHeader),
        (None, Some(value)) => {
            let token = value.strip_prefix("Bearer ").ok_or_else(|| {
                ApiError::unauthorized("Authorization header must use Bearer scheme")
            })?;
            (token.trim(), AuthMethod::Bearer)
        }
        (None, None) => {
            return Err(ApiError::unauthorized(
                "Authentication required: provide X-API-Key or Authorization header",
            ))
        }
    };

    if key.is_empty() || !config.is_valid_api_key(key) {
        return Err(ApiError::unauthorized("Invalid API key"));
    }
    Ok(AuthContext::new(key, method))
}

// ============================================================================
// MIDDLEWARE FUNCTION
// ============================================================================

/// Authentication middleware.
///
/// ```ignore
/// let app = Router::new()
///     .route("/events", post(submit_event))
///     .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(config): State<Arc<ApiConfig>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let api_key_header = request
        .headers()
        .get("x-api-key")
        .and_then(|h| h.to_str().ok());

    let auth_header = request
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok());

    let auth_context = authenticate(&config, api_key_header, auth_header).map_err(|e| {
        tracing::debug!(path = %request.uri().path(), "Rejected unauthenticated request");
        AuthMiddlewareError(e)
    })?;

    request.extensions_mut().insert(auth_context);
    Ok(next.run(request).await)
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

/// Error wrapper for middleware that implements IntoResponse.
#[derive(Debug)]
pub struct AuthMiddlewareError(pub ApiError);

impl IntoResponse for AuthMiddlewareError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// Typed Axum extractor for the authentication context.
///
/// The `auth_middleware` must be applied to the route for this extractor
/// to work; without it the extractor answers 500.
#[derive(Debug, Clone)]
pub struct AuthExtractor(pub AuthContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthExtractor
where
    S: Send + Sync,
{
    type Rejection = AuthMiddlewareError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(AuthExtractor)
            .ok_or_else(|| {
                AuthMiddlewareError(ApiError::internal_error(
                    "AuthContext not found in request extensions. \
                     Ensure auth_middleware is applied to this route.",
                ))
            })
    }
}

impl std::ops::Deref for AuthExtractor {
    type Target = AuthContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ============================================================================
// TESTS
// ============================================================================
