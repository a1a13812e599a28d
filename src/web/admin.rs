//! Moderation queue and the admin dashboard
//!
//! Permission checks live in the services; a member who opens these pages
//! gets the 403 error page.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Response,
    Form,
};
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::api::common::default_page;
use crate::api::middleware::AppState;
use crate::api::responses::UserResponse;
use crate::models::{CommentWithAuthor, ListParams, StorySummary, UserFilter, UserRole, UserStatus};
use crate::web::context::{check_csrf, redirect_on_error, safe_redirect_target, success};
use crate::web::pages::Pager;
use crate::web::{PageContext, SignedIn, WebError};

const QUEUE_PAGE_SIZE: u32 = 20;
const USERS_PAGE_SIZE: u32 = 30;
const RECENT_LOGINS: i64 = 15;

#[derive(Debug, Deserialize)]
pub struct QueueQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page")]
    pub comments_page: u32,
}

#[derive(Debug, Deserialize)]
pub struct ModerationForm {
    #[serde(default)]
    pub note: String,
    /// Page to return to, the queue by default
    #[serde(default)]
    pub back: Option<String>,
    #[serde(default)]
    pub csrf_token: String,
}

#[derive(Debug, Deserialize)]
pub struct UsersQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    pub search: Option<String>,
    pub role: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserActionForm {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub csrf_token: String,
}

/// GET /moderation - Stories and comments waiting for review
pub async fn moderation_queue(
    State(state): State<AppState>,
    signed_in: SignedIn,
    headers: HeaderMap,
    Query(query): Query<QueueQuery>,
) -> Result<Response, WebError> {
    let mut page = PageContext::new(&state, &headers, Some(&signed_in.user), Some(&signed_in.session), None).await;
    let stories: Pager<StorySummary> = state
        .story_service
        .moderation_queue(&signed_in.user, &page.lang, &ListParams::new(query.page, QUEUE_PAGE_SIZE))
        .await?
        .into();
    let comments: Pager<CommentWithAuthor> = state
        .comment_service
        .pending(&signed_in.user, &ListParams::new(query.comments_page, QUEUE_PAGE_SIZE))
        .await?
        .into();
    page.insert("stories", &stories);
    page.insert("comments", &comments);
    Ok(page.render(&state, "moderation.html"))
}

/// POST /moderation/stories/{id}/{action} - approve, reject or unpublish
pub async fn moderate_story(
    State(state): State<AppState>,
    signed_in: SignedIn,
    Path((id, action)): Path<(i64, String)>,
    Form(form): Form<ModerationForm>,
) -> Result<Response, WebError> {
    check_csrf(&signed_in.session, &form.csrf_token)?;
    let back = safe_redirect_target(form.back.as_deref().or(Some("/moderation")));
    let moderator = &signed_in.user;
    let result = match action.as_str() {
        "approve" => state.story_service.approve(moderator, id).await.map(|_| "Story published"),
        "reject" => state
            .story_service
            .reject(moderator, id, &form.note)
            .await
            .map(|_| "Story sent back to the author"),
        "unpublish" => state
            .story_service
            .unpublish(moderator, id, Some(form.note.as_str()))
            .await
            .map(|_| "Story unpublished"),
        _ => return Err(WebError::not_found()),
    };
    Ok(match result {
        Ok(message) => success(&back, message),
        Err(e) => redirect_on_error(&back, e),
    })
}

/// POST /moderation/comments/{id}/{action} - approve or reject
pub async fn moderate_comment(
    State(state): State<AppState>,
    signed_in: SignedIn,
    Path((id, action)): Path<(i64, String)>,
    Form(form): Form<ModerationForm>,
) -> Result<Response, WebError> {
    check_csrf(&signed_in.session, &form.csrf_token)?;
    let back = safe_redirect_target(form.back.as_deref().or(Some("/moderation")));
    let result = match action.as_str() {
        "approve" => state
            .comment_service
            .approve(&signed_in.user, id)
            .await
            .map(|_| "Comment approved"),
        "reject" => state
            .comment_service
            .reject(&signed_in.user, id)
            .await
            .map(|_| "Comment rejected"),
        _ => return Err(WebError::not_found()),
    };
    Ok(match result {
        Ok(message) => success(&back, message),
        Err(e) => redirect_on_error(&back, e),
    })
}

/// GET /admin - Community numbers, server health and recent logins
pub async fn dashboard(
    State(state): State<AppState>,
    signed_in: SignedIn,
    headers: HeaderMap,
) -> Result<Response, WebError> {
    let admin = &signed_in.user;
    let site = state.statistics_service.site_statistics(admin).await?;
    let system = state.statistics_service.system_statistics(admin).await?;
    let logins = state.user_service.recent_logins(admin, RECENT_LOGINS).await?;
    let failed = state
        .user_service
        .failed_logins_since(Utc::now() - Duration::hours(24))
        .await?;

    let mut page = PageContext::new(&state, &headers, Some(admin), Some(&signed_in.session), None).await;
    page.insert("site", &site);
    page.insert("system", &system);
    page.insert("logins", &logins);
    page.insert("failed_logins_24h", &failed);
    Ok(page.render(&state, "admin_dashboard.html"))
}

/// GET /admin/users
pub async fn users(
    State(state): State<AppState>,
    signed_in: SignedIn,
    headers: HeaderMap,
    Query(query): Query<UsersQuery>,
) -> Result<Response, WebError> {
    let filter = UserFilter {
        role: query.role.as_deref().and_then(|r| r.parse::<UserRole>().ok()),
        status: query.status.as_deref().and_then(|s| s.parse::<UserStatus>().ok()),
        search: query.search.clone().filter(|s| !s.trim().is_empty()),
    };
    let users: Pager<UserResponse> = state
        .user_service
        .list_users(&signed_in.user, &filter, &ListParams::new(query.page, USERS_PAGE_SIZE))
        .await?
        .map(UserResponse::from)
        .into();

    let mut page = PageContext::new(&state, &headers, Some(&signed_in.user), Some(&signed_in.session), None).await;
    page.insert("users", &users);
    page.insert("search", &query.search.unwrap_or_default());
    page.insert("role_filter", &query.role.unwrap_or_default());
    page.insert("status_filter", &query.status.unwrap_or_default());
    page.insert("roles", &["member", "moderator", "admin"]);
    Ok(page.render(&state, "admin_users.html"))
}

/// POST /admin/users/{id}/{action}
pub async fn user_action(
    State(state): State<AppState>,
    signed_in: SignedIn,
    Path((id, action)): Path<(i64, String)>,
    Form(form): Form<UserActionForm>,
) -> Result<Response, WebError> {
    check_csrf(&signed_in.session, &form.csrf_token)?;
    let admin = &signed_in.user;
    let users = &state.user_service;
    let result = match action.as_str() {
        "role" => {
            let role = form
                .role
                .parse::<UserRole>()
                .map_err(|e| WebError::page(StatusCode::BAD_REQUEST, e.to_string()))?;
            users.change_role(admin, id, role).await.map(|_| "Role changed")
        }
        "ban" => users.ban(admin, id).await.map(|_| "User banned"),
        "unban" => users.unban(admin, id).await.map(|_| "User unbanned"),
        "verify" => users.set_verified(admin, id, true).await.map(|_| "User verified"),
        "unverify" => users.set_verified(admin, id, false).await.map(|_| "Verification removed"),
        "premium" => users.set_premium(admin, id, true).await.map(|_| "Premium access granted"),
        "unpremium" => users.set_premium(admin, id, false).await.map(|_| "Premium access removed"),
        "delete" => users.delete_user(admin, id).await.map(|_| "User deleted"),
        _ => return Err(WebError::not_found()),
    };
    Ok(match result {
        Ok(message) => success("/admin/users", message),
        Err(e) => redirect_on_error("/admin/users", e),
    })
}
