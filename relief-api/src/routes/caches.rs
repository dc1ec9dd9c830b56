//! Cache administration route

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use relief_storage::{CacheKey, InvalidationScope};

use crate::error::{ApiError, ApiResult};
use crate::middleware::AuthExtractor;
use crate::state::ApiCache;

/// Exactly one of the three selects what to drop.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PruneParams {
    /// Path prefix, matched on whole segments (`/feeds` covers `/feeds/7`).
    pub prefix: Option<String>,
    /// One canonical key, e.g. `GET /needs?only_not_resolved=true`.
    pub key: Option<String>,
    #[serde(default)]
    pub all: bool,
}

impl PruneParams {
    fn scope(&self) -> ApiResult<InvalidationScope> {
        let prefix = self.prefix.as_deref().map(str::trim).filter(|p| !p.is_empty());
        let key = self.key.as_deref().map(str::trim).filter(|k| !k.is_empty());

        match (prefix, key, self.all) {
            (Some(prefix), None, false) => Ok(InvalidationScope::path_prefix(prefix)),
            (None, Some(key), false) => CacheKey::parse(key)
                .map(InvalidationScope::Exact)
                .ok_or_else(|| {
                    ApiError::invalid_input(format!(
                        "'{}' is not a cache key, expected \"METHOD /path[?query]\"",
                        key
                    ))
                }),
            (None, None, true) => Ok(InvalidationScope::All),
            (None, None, false) => Err(ApiError::missing_field("prefix|key|all")),
            _ => Err(ApiError::invalid_input(
                "Pass exactly one of prefix, key or all=true",
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneResponse {
    pub scope: String,
    pub removed: u64,
}

/// GET /caches/prune - Invalidate cached responses
///
/// Idempotent: a scope that matches nothing still answers 200.
pub async fn prune_cache(
    State(cache): State<ApiCache>,
    auth: AuthExtractor,
    Query(params): Query<PruneParams>,
) -> ApiResult<Json<PruneResponse>> {
    let scope = params.scope()?;
    let removed = cache.invalidate(&scope);
    tracing::info!(scope = %scope, removed, key_hint = %auth.key_hint, "Cache pruned");

    Ok(Json(PruneResponse {
        scope: scope.to_string(),
        removed,
    }))
}
