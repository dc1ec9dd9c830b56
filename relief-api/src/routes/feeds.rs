//! Feed REST API Routes
//!
//! Feed-area listing and single-feed reads go through the response cache.
//! The location update writes straight to the origin store and leaves
//! cached listings alone: they stay stale until their TTL runs out or an
//! operator prunes them.

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use serde::{Deserialize, Serialize};

use relief_core::{Feed, FeedArea, FeedAreaQuery, FeedId, UpdateFeedLocationsRequest};

use crate::error::{ApiError, ApiResult};
use crate::state::Repository;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedAreasResponse {
    pub count: usize,
    pub results: Vec<FeedArea>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UpdateFeedLocationsResponse {
    pub updated: u64,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// GET /feeds/areas - Feed areas inside a bounding box
pub async fn list_feed_areas(
    State(repository): State<Repository>,
    query: Result<Query<FeedAreaQuery>, QueryRejection>,
) -> ApiResult<Json<FeedAreasResponse>> {
    let Query(query) = query.map_err(|e| ApiError::invalid_input(e.body_text()))?;
    query.validate()?;

    let results = repository.feed_areas(&query).await?;
    Ok(Json(FeedAreasResponse {
        count: results.len(),
        results,
    }))
}

/// GET /feeds/{id} - A single feed
pub async fn get_feed(
    State(repository): State<Repository>,
    id: Result<Path<FeedId>, PathRejection>,
) -> ApiResult<Json<Feed>> {
    let Path(id) = id.map_err(|e| ApiError::invalid_input(e.body_text()))?;
    let feed = repository.feed(id).await?;
    Ok(Json(feed))
}

/// PATCH /feeds/areas - Move feed areas to corrected locations
pub async fn update_feed_locations(
    State(repository): State<Repository>,
    request: Result<Json<UpdateFeedLocationsRequest>, JsonRejection>,
) -> ApiResult<Json<UpdateFeedLocationsResponse>> {
    let Json(request) = request.map_err(|e| ApiError::invalid_input(e.body_text()))?;
    request.validate()?;

    let updated = repository.update_feed_locations(&request.feeds).await?;
    tracing::info!(
        requested = request.feeds.len(),
        updated,
        "Feed locations updated"
    );
    Ok(Json(UpdateFeedLocationsResponse { updated }))
}
