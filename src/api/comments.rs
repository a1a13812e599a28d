//! Comment API endpoints
//!
//! - GET /api/v1/stories/{id}/comments - Comment tree of a story
//! - POST /api/v1/stories/{id}/comments - Post a comment or reply
//! - DELETE /api/v1/comments/{id} - Delete a comment and its replies

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser, MaybeUser};
use crate::models::{CommentStatus, CommentWithAuthor, CreateCommentInput, Permission};

/// Response for a new comment
#[derive(Debug, Serialize)]
pub struct CreateCommentResponse {
    pub id: i64,
    pub status: CommentStatus,
    /// False when the comment waits for a moderator
    pub visible: bool,
}

/// Response for a story's comments
#[derive(Debug, Serialize)]
pub struct CommentListResponse {
    pub comments: Vec<CommentWithAuthor>,
    pub total: usize,
}

pub fn public_router() -> Router<AppState> {
    Router::new().route("/stories/{story}/comments", get(get_comments))
}

pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/stories/{story}/comments", post(create_comment))
        .route("/comments/{id}", delete(delete_comment))
}

/// GET /api/v1/stories/{id}/comments
async fn get_comments(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    Path(story_id): Path<i64>,
) -> Result<Json<CommentListResponse>, ApiError> {
    let story = state
        .story_service
        .get_by_id(story_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Story not found"))?;

    let privileged = viewer
        .as_ref()
        .is_some_and(|v| story.is_author(v) || v.has_permission(Permission::ModerateStories));
    if !privileged && !(story.is_published() && story.access_level.permits(viewer.as_ref())) {
        return Err(ApiError::not_found("Story not found"));
    }

    let comments = state
        .comment_service
        .list_for_story(story_id, viewer.as_ref())
        .await?;
    let total = comments.iter().map(CommentWithAuthor::thread_size).sum();
    Ok(Json(CommentListResponse { comments, total }))
}

/// POST /api/v1/stories/{id}/comments
async fn create_comment(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(story_id): Path<i64>,
    Json(body): Json<CreateCommentInput>,
) -> Result<(StatusCode, Json<CreateCommentResponse>), ApiError> {
    let comment = state.comment_service.create(&user, story_id, body).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateCommentResponse {
            id: comment.id,
            visible: comment.status == CommentStatus::Approved,
            status: comment.status,
        }),
    ))
}

/// DELETE /api/v1/comments/{id}
async fn delete_comment(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.comment_service.delete(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
