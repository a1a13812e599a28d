//! Notification API endpoints
//!
//! - GET /api/v1/notifications - The current user's notifications
//! - GET /api/v1/notifications/unread-count
//! - POST /api/v1/notifications/{id}/read
//! - POST /api/v1/notifications/read-all

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::common::{default_page, default_per_page};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{ListResponse, MessageResponse};
use crate::models::{ListParams, Notification};

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkAllReadResponse {
    pub marked: u64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_notifications))
        .route("/unread-count", get(unread_count))
        .route("/read-all", post(mark_all_read))
        .route("/{id}/read", post(mark_read))
}

async fn list_notifications(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<ListResponse<Notification>>, ApiError> {
    let params = ListParams::new(query.page, query.per_page);
    let result = state
        .notification_service
        .list(user.id, query.unread_only, &params)
        .await?;
    Ok(Json(result.into()))
}

async fn unread_count(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let unread = state.notification_service.unread_count(user.id).await?;
    Ok(Json(UnreadCountResponse { unread }))
}

async fn mark_read(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.notification_service.mark_read(id, user.id).await?;
    Ok(Json(MessageResponse::new("Notification marked as read")))
}

async fn mark_all_read(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<MarkAllReadResponse>, ApiError> {
    let marked = state.notification_service.mark_all_read(user.id).await?;
    Ok(Json(MarkAllReadResponse { marked }))
}
