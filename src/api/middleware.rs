//! API middleware
//!
//! Contains:
//! - the shared application state
//! - the JSON error type and its mapping from service errors
//! - session authentication (cookie or bearer token)
//! - request statistics

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::db::DynDatabasePool;
use crate::models::{ClientInfo, Permission, Session, User};
use crate::services::backup::{BackupError, DatabaseBackupManager};
use crate::services::category::{CategoryService, CategoryServiceError};
use crate::services::comment::{CommentService, CommentServiceError};
use crate::services::email::EmailService;
use crate::services::i18n::{I18nService, I18nServiceError};
use crate::services::notification::{NotificationService, NotificationServiceError};
use crate::services::rate_limiter::{RateLimited, RateLimiter};
use crate::services::settings::{SettingsService, SettingsServiceError};
use crate::services::statistics::{RequestStats, StatisticsService, StatisticsServiceError};
use crate::services::story::{StoryService, StoryServiceError};
use crate::services::tag::{TagService, TagServiceError};
use crate::services::user::{UserService, UserServiceError};
use crate::view::ViewEngine;

/// Name of the session cookie
pub const SESSION_COOKIE: &str = "session";

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub config: Arc<Config>,
    pub user_service: Arc<UserService>,
    pub story_service: Arc<StoryService>,
    pub comment_service: Arc<CommentService>,
    pub category_service: Arc<CategoryService>,
    pub tag_service: Arc<TagService>,
    pub notification_service: Arc<NotificationService>,
    pub settings_service: Arc<SettingsService>,
    pub email_service: Arc<EmailService>,
    pub i18n_service: Arc<I18nService>,
    pub statistics_service: Arc<StatisticsService>,
    pub backup_manager: Arc<DatabaseBackupManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub view: Arc<ViewEngine>,
    pub request_stats: Arc<RequestStats>,
}

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

/// The session behind an authenticated request
#[derive(Debug, Clone)]
pub struct CurrentSession(pub Session);

/// The user when a valid session is present
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<User>);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentSession>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(
            parts.extensions.get::<AuthenticatedUser>().map(|u| u.0.clone()),
        ))
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn rate_limited(limited: RateLimited) -> Self {
        Self::with_details(
            "RATE_LIMITED",
            limited.to_string(),
            serde_json::json!({ "retry_after_secs": limited.retry_after_secs }),
        )
    }

    /// Log the cause and hide it from the client
    pub fn internal_error(cause: impl std::fmt::Display) -> Self {
        tracing::error!("Internal error: {}", cause);
        Self::new("INTERNAL_ERROR", "Something went wrong, please try again later")
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMITED" => StatusCode::TOO_MANY_REQUESTS,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self
            .error
            .details
            .as_ref()
            .and_then(|d| d.get("retry_after_secs"))
            .and_then(|v| v.as_i64());

        let mut response = (status, Json(self)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<UserServiceError> for ApiError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::AuthenticationError(msg) => ApiError::unauthorized(msg),
            UserServiceError::AccountBanned => ApiError::new("FORBIDDEN", err.to_string()),
            UserServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            UserServiceError::UserExists(msg) => ApiError::conflict(msg),
            UserServiceError::NotFound => ApiError::not_found("User not found"),
            UserServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            UserServiceError::LastAdmin => ApiError::conflict(err.to_string()),
            UserServiceError::Conflict(msg) => ApiError::conflict(msg),
            UserServiceError::RateLimited(limited) => ApiError::rate_limited(limited),
            UserServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<StoryServiceError> for ApiError {
    fn from(err: StoryServiceError) -> Self {
        match err {
            StoryServiceError::NotFound => ApiError::not_found("Story not found"),
            StoryServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            StoryServiceError::AccessDenied { required } => ApiError::with_details(
                "FORBIDDEN",
                err.to_string(),
                serde_json::json!({ "required_access_level": required }),
            ),
            StoryServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            StoryServiceError::InvalidTransition { .. } => ApiError::conflict(err.to_string()),
            StoryServiceError::Conflict(msg) => ApiError::conflict(msg),
            StoryServiceError::RateLimited(limited) => ApiError::rate_limited(limited),
            StoryServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<CommentServiceError> for ApiError {
    fn from(err: CommentServiceError) -> Self {
        match err {
            CommentServiceError::NotFound => ApiError::not_found("Comment not found"),
            CommentServiceError::StoryNotFound => ApiError::not_found("Story not found"),
            CommentServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            CommentServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            CommentServiceError::RateLimited(limited) => ApiError::rate_limited(limited),
            CommentServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<CategoryServiceError> for ApiError {
    fn from(err: CategoryServiceError) -> Self {
        match err {
            CategoryServiceError::DuplicateSlug(_) => ApiError::conflict(err.to_string()),
            CategoryServiceError::NotFound(_) => ApiError::not_found(err.to_string()),
            CategoryServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            CategoryServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<TagServiceError> for ApiError {
    fn from(err: TagServiceError) -> Self {
        match err {
            TagServiceError::NotFound(_) => ApiError::not_found(err.to_string()),
            TagServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            TagServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<NotificationServiceError> for ApiError {
    fn from(err: NotificationServiceError) -> Self {
        match err {
            NotificationServiceError::NotFound => ApiError::not_found("Notification not found"),
            NotificationServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<SettingsServiceError> for ApiError {
    fn from(err: SettingsServiceError) -> Self {
        match err {
            SettingsServiceError::InvalidValue(msg) => ApiError::validation_error(msg),
            SettingsServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<I18nServiceError> for ApiError {
    fn from(err: I18nServiceError) -> Self {
        match err {
            I18nServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            I18nServiceError::NotFound => ApiError::not_found("Translation not found"),
            I18nServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<StatisticsServiceError> for ApiError {
    fn from(err: StatisticsServiceError) -> Self {
        match err {
            StatisticsServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            StatisticsServiceError::InternalError(e) => ApiError::internal_error(e),
        }
    }
}

impl From<BackupError> for ApiError {
    fn from(err: BackupError) -> Self {
        match err {
            BackupError::InvalidName(_) => ApiError::validation_error(err.to_string()),
            BackupError::NotFound(_) => ApiError::not_found(err.to_string()),
            BackupError::Unsupported(msg) => ApiError::validation_error(msg),
            other => ApiError::internal_error(other),
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Read a cookie value from request headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Session token from the `Authorization` header or the session cookie
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }
    cookie_value(headers, SESSION_COOKIE).filter(|token| !token.is_empty())
}

/// Client address and agent, used for rate limits and login logs
pub fn client_info(headers: &HeaderMap) -> ClientInfo {
    let ip_address = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|value| value.to_str().ok())
                .map(|ip| ip.trim().to_string())
        })
        .filter(|ip| !ip.is_empty());
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(|agent| agent.chars().take(512).collect());
    ClientInfo {
        ip_address,
        user_agent,
    }
}

/// `Set-Cookie` value for a new session
pub fn session_cookie(token: &str, days: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        days * 24 * 60 * 60
    )
}

pub fn clear_session_cookie() -> &'static str {
    "session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
}

/// Attach the user and session when the request carries a valid session
pub async fn optional_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    if let Some(token) = extract_session_token(request.headers()) {
        match state.user_service.validate_session(&token).await {
            Ok(Some((user, session))) => {
                request.extensions_mut().insert(AuthenticatedUser(user));
                request.extensions_mut().insert(CurrentSession(session));
            }
            Ok(None) => {}
            Err(e) => tracing::error!("Session validation failed: {}", e),
        }
    }
    next.run(request).await
}

/// Reject requests without a user (runs after `optional_auth`)
pub async fn require_auth(request: Request, next: Next) -> Result<Response, ApiError> {
    if request.extensions().get::<AuthenticatedUser>().is_none() {
        return Err(ApiError::unauthorized("Authentication required"));
    }
    Ok(next.run(request).await)
}

/// Reject users without moderation rights
pub async fn require_moderator(request: Request, next: Next) -> Result<Response, ApiError> {
    require_permission(&request, Permission::ModerateStories)?;
    Ok(next.run(request).await)
}

/// Reject users who cannot manage users
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    require_permission(&request, Permission::ManageUsers)?;
    Ok(next.run(request).await)
}

fn require_permission(request: &Request, permission: Permission) -> Result<(), ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
    if !user.0.has_permission(permission) {
        return Err(ApiError::forbidden(format!("Permission {} required", permission)));
    }
    Ok(())
}

/// Records request count and response time
pub async fn request_stats_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    state.request_stats.record(start.elapsed().as_micros() as u64);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn test_extract_session_token() {
        assert_eq!(
            extract_session_token(&headers(&[("authorization", "Bearer abc")])).as_deref(),
            Some("abc")
        );
        assert_eq!(
            extract_session_token(&headers(&[("cookie", "lang=es; session=xyz")])).as_deref(),
            Some("xyz")
        );
        assert!(extract_session_token(&headers(&[("cookie", "session=")])).is_none());
        assert!(extract_session_token(&headers(&[("cookie", "sessionid=nope")])).is_none());
    }

    #[test]
    fn test_client_info() {
        let info = client_info(&headers(&[
            ("x-forwarded-for", "10.0.0.1, 10.0.0.2"),
            ("user-agent", "test"),
        ]));
        assert_eq!(info.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(info.user_agent.as_deref(), Some("test"));
        assert!(client_info(&HeaderMap::new()).ip_address.is_none());
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ApiError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::rate_limited(RateLimited { retry_after_secs: 9 }).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        let response = ApiError::rate_limited(RateLimited { retry_after_secs: 9 }).into_response();
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "9");
        assert_eq!(
            ApiError::from(UserServiceError::LastAdmin).status(),
            StatusCode::CONFLICT
        );
    }
}
