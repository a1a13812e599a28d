//! Moderation API endpoints
//!
//! Every route needs a moderator:
//! - GET /api/v1/moderation/stories - Stories waiting for review
//! - POST /api/v1/moderation/stories/{id}/approve
//! - POST /api/v1/moderation/stories/{id}/reject
//! - POST /api/v1/moderation/stories/{id}/unpublish
//! - GET /api/v1/moderation/comments - Comments waiting for review
//! - POST /api/v1/moderation/comments/{id}/approve
//! - POST /api/v1/moderation/comments/{id}/reject

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{request_language, AdminPaginationQuery};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{ListResponse, MessageResponse};
use crate::models::{CommentWithAuthor, Story, StorySummary};

/// Reason shown to the author
#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub note: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UnpublishRequest {
    #[serde(default)]
    pub note: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stories", get(story_queue))
        .route("/stories/{id}/approve", post(approve_story))
        .route("/stories/{id}/reject", post(reject_story))
        .route("/stories/{id}/unpublish", post(unpublish_story))
        .route("/comments", get(comment_queue))
        .route("/comments/{id}/approve", post(approve_comment))
        .route("/comments/{id}/reject", post(reject_comment))
}

async fn story_queue(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    headers: HeaderMap,
    Query(query): Query<AdminPaginationQuery>,
) -> Result<Json<ListResponse<StorySummary>>, ApiError> {
    let lang = request_language(&state, &headers, None, Some(&user));
    let result = state
        .story_service
        .moderation_queue(&user, &lang, &query.params())
        .await?;
    Ok(Json(result.into()))
}

async fn approve_story(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Story>, ApiError> {
    Ok(Json(state.story_service.approve(&user, id).await?))
}

async fn reject_story(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<RejectRequest>,
) -> Result<Json<Story>, ApiError> {
    Ok(Json(state.story_service.reject(&user, id, &body.note).await?))
}

async fn unpublish_story(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    body: Option<Json<UnpublishRequest>>,
) -> Result<Json<Story>, ApiError> {
    let note = body.and_then(|Json(b)| b.note);
    Ok(Json(
        state
            .story_service
            .unpublish(&user, id, note.as_deref())
            .await?,
    ))
}

async fn comment_queue(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Query(query): Query<AdminPaginationQuery>,
) -> Result<Json<ListResponse<CommentWithAuthor>>, ApiError> {
    let result = state.comment_service.pending(&user, &query.params()).await?;
    Ok(Json(result.into()))
}

async fn approve_comment(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.comment_service.approve(&user, id).await?;
    Ok(Json(MessageResponse::new("Comment approved")))
}

async fn reject_comment(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.comment_service.reject(&user, id).await?;
    Ok(Json(MessageResponse::new("Comment rejected")))
}
