//! Tag API endpoints
//!
//! - GET /api/v1/tags - Tag cloud, most used first
//! - GET /api/v1/tags/{slug} - One tag
//! - DELETE /api/v1/admin/tags/{slug} - Delete a tag (admin)

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState};
use crate::models::{Tag, TagWithCount};

const DEFAULT_CLOUD_SIZE: i64 = 50;
const MAX_CLOUD_SIZE: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct TagCloudQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TagCloudResponse {
    pub tags: Vec<TagWithCount>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(tag_cloud))
        .route("/{slug}", get(get_tag))
}

pub fn admin_router() -> Router<AppState> {
    Router::new().route("/{slug}", delete(delete_tag))
}

/// GET /api/v1/tags
async fn tag_cloud(
    State(state): State<AppState>,
    Query(query): Query<TagCloudQuery>,
) -> Result<Json<TagCloudResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_CLOUD_SIZE).clamp(1, MAX_CLOUD_SIZE);
    let tags = state.tag_service.tag_cloud(limit).await?;
    Ok(Json(TagCloudResponse { tags }))
}

/// GET /api/v1/tags/{slug}
async fn get_tag(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Tag>, ApiError> {
    state
        .tag_service
        .get_by_slug(&slug)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Tag '{}' not found", slug)))
}

async fn delete_tag(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.tag_service.delete(&slug).await?;
    Ok(StatusCode::NO_CONTENT)
}
