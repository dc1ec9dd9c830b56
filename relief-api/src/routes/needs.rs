//! Need REST API Routes

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use relief_core::{CreateNeedRequest, Need, NeedFilter};

use crate::error::{ApiError, ApiResult};
use crate::state::Repository;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeedsResponse {
    pub count: usize,
    pub results: Vec<Need>,
}

/// GET /needs - List needs, `?only_not_resolved=true` to skip resolved ones
pub async fn list_needs(
    State(repository): State<Repository>,
    filter: Result<Query<NeedFilter>, QueryRejection>,
) -> ApiResult<Json<NeedsResponse>> {
    let Query(filter) = filter.map_err(|e| ApiError::invalid_input(e.body_text()))?;
    let results = repository.needs(&filter).await?;
    Ok(Json(NeedsResponse {
        count: results.len(),
        results,
    }))
}

/// POST /needs - Record a new need
pub async fn create_need(
    State(repository): State<Repository>,
    request: Result<Json<CreateNeedRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Need>)> {
    let Json(request) = request.map_err(|e| ApiError::invalid_input(e.body_text()))?;
    request.validate()?;

    let need = repository.create_need(&request).await?;
    tracing::info!(need_id = need.id, "Need created");
    Ok((StatusCode::CREATED, Json(need)))
}
