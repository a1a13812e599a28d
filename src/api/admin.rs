//! Admin API endpoints
//!
//! Handles HTTP requests for site administration:
//! - User management (roles, bans, verification, premium access)
//! - Community and system statistics
//! - Login history
//! - Database backups
//! - Site settings

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::api::common::{default_page, default_per_page};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::{ListResponse, MessageResponse, UserResponse};
use crate::models::{ListParams, LoginLog, SiteStatistics, SystemStatistics, UserFilter, UserRole, UserStatus};
use crate::services::backup::BackupInfo;
use crate::services::settings::SiteSettings;

/// Query parameters for the user list
#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    pub role: Option<UserRole>,
    pub status: Option<UserStatus>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub role: UserRole,
}

/// Body for on/off flags such as verification
#[derive(Debug, Deserialize)]
pub struct FlagRequest {
    pub value: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoginLogQuery {
    #[serde(default = "default_login_log_limit")]
    pub limit: i64,
}

fn default_login_log_limit() -> i64 {
    50
}

/// Community statistics plus recent failed logins
#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    #[serde(flatten)]
    pub statistics: SiteStatistics,
    pub failed_logins_24h: i64,
}

/// Recipient of the SMTP test, the admin's own address by default
#[derive(Debug, Default, Deserialize)]
pub struct TestEmailRequest {
    #[serde(default)]
    pub to: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BackupListResponse {
    pub backups: Vec<BackupInfo>,
    pub directory: String,
}

#[derive(Debug, Serialize)]
pub struct PruneResponse {
    pub removed: usize,
}

/// Site settings without the SMTP password
#[derive(Debug, Serialize)]
pub struct SiteSettingsResponse {
    #[serde(flatten)]
    pub settings: SiteSettings,
    pub smtp_password_set: bool,
}

impl From<SiteSettings> for SiteSettingsResponse {
    fn from(mut settings: SiteSettings) -> Self {
        let smtp_password_set = !settings.smtp_password.is_empty();
        settings.smtp_password = String::new();
        Self {
            settings,
            smtp_password_set,
        }
    }
}

/// Build the admin router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/{id}", delete(delete_user))
        .route("/users/{id}/role", put(change_role))
        .route("/users/{id}/ban", post(ban_user))
        .route("/users/{id}/unban", post(unban_user))
        .route("/users/{id}/verified", put(set_verified))
        .route("/users/{id}/premium", put(set_premium))
        .route("/stats", get(site_stats))
        .route("/stats/system", get(system_stats))
        .route("/login-logs", get(login_logs))
        .route("/backups", get(list_backups).post(create_backup))
        .route("/backups/prune", post(prune_backups))
        .route("/backups/{name}", delete(delete_backup))
        .route("/backups/{name}/restore", post(restore_backup))
        .route("/settings", get(get_settings).put(update_settings))
        .route("/settings/test-email", post(send_test_email))
}

// ============================================================================
// Users
// ============================================================================

async fn list_users(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<ListResponse<UserResponse>>, ApiError> {
    let filter = UserFilter {
        role: query.role,
        status: query.status,
        search: query.search.filter(|s| !s.trim().is_empty()),
    };
    let params = ListParams::new(query.page, query.per_page);
    let result = state.user_service.list_users(&admin, &filter, &params).await?;
    Ok(Json(result.map(UserResponse::from).into()))
}

async fn change_role(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<ChangeRoleRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.user_service.change_role(&admin, id, body.role).await?;
    Ok(Json(user.into()))
}

async fn ban_user(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(state.user_service.ban(&admin, id).await?.into()))
}

async fn unban_user(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(state.user_service.unban(&admin, id).await?.into()))
}

async fn set_verified(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<FlagRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(
        state
            .user_service
            .set_verified(&admin, id, body.value)
            .await?
            .into(),
    ))
}

async fn set_premium(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<FlagRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    Ok(Json(
        state
            .user_service
            .set_premium(&admin, id, body.value)
            .await?
            .into(),
    ))
}

async fn delete_user(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.user_service.delete_user(&admin, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Statistics
// ============================================================================

async fn site_stats(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
) -> Result<Json<DashboardResponse>, ApiError> {
    let statistics = state.statistics_service.site_statistics(&admin).await?;
    let failed_logins_24h = state
        .user_service
        .failed_logins_since(Utc::now() - Duration::hours(24))
        .await?;
    Ok(Json(DashboardResponse {
        statistics,
        failed_logins_24h,
    }))
}

async fn system_stats(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
) -> Result<Json<SystemStatistics>, ApiError> {
    Ok(Json(state.statistics_service.system_statistics(&admin).await?))
}

async fn login_logs(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Query(query): Query<LoginLogQuery>,
) -> Result<Json<Vec<LoginLog>>, ApiError> {
    Ok(Json(state.user_service.recent_logins(&admin, query.limit).await?))
}

// ============================================================================
// Backups
// ============================================================================

async fn list_backups(State(state): State<AppState>) -> Result<Json<BackupListResponse>, ApiError> {
    let backups = state.backup_manager.list_backups().await?;
    Ok(Json(BackupListResponse {
        backups,
        directory: state.backup_manager.directory().display().to_string(),
    }))
}

/// POST /api/v1/admin/backups - Take a backup, then apply retention
async fn create_backup(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
) -> Result<(StatusCode, Json<BackupInfo>), ApiError> {
    let backup = state.backup_manager.create_backup().await?;
    tracing::info!("User {} created backup {}", admin.username, backup.name);
    if let Err(e) = state.backup_manager.prune_to_config().await {
        tracing::warn!("Failed to prune old backups: {}", e);
    }
    Ok((StatusCode::CREATED, Json(backup)))
}

async fn prune_backups(State(state): State<AppState>) -> Result<Json<PruneResponse>, ApiError> {
    let removed = state.backup_manager.prune_to_config().await?;
    Ok(Json(PruneResponse { removed }))
}

async fn restore_backup(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Path(name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.backup_manager.restore_backup(&name).await?;
    tracing::warn!("User {} restored backup {}", admin.username, name);
    Ok(Json(MessageResponse::new(format!("Backup {} restored", name))))
}

async fn delete_backup(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.backup_manager.delete_backup(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Settings
// ============================================================================

async fn get_settings(State(state): State<AppState>) -> Result<Json<SiteSettingsResponse>, ApiError> {
    Ok(Json(state.settings_service.get_site_settings().await?.into()))
}

/// PUT /api/v1/admin/settings - An empty SMTP password keeps the stored one
async fn update_settings(
    State(state): State<AppState>,
    Json(mut body): Json<SiteSettings>,
) -> Result<Json<SiteSettingsResponse>, ApiError> {
    if body.smtp_password.is_empty() {
        body.smtp_password = state.settings_service.get_site_settings().await?.smtp_password;
    }
    state.settings_service.update_site_settings(&body).await?;
    Ok(Json(state.settings_service.get_site_settings().await?.into()))
}

/// POST /api/v1/admin/settings/test-email - Check the SMTP settings
async fn send_test_email(
    State(state): State<AppState>,
    AuthenticatedUser(admin): AuthenticatedUser,
    Json(body): Json<TestEmailRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !state.email_service.is_enabled().await {
        return Err(ApiError::validation_error("SMTP is not configured"));
    }
    let to = body.to.filter(|t| !t.trim().is_empty()).unwrap_or(admin.email);
    state
        .email_service
        .send_test_email(&to)
        .await
        .map_err(|e| {
            tracing::warn!("Test e-mail to {} failed: {}", to, e);
            ApiError::with_details(
                "EMAIL_FAILED",
                "The test e-mail could not be sent",
                serde_json::json!({ "reason": e.to_string() }),
            )
        })?;
    Ok(Json(MessageResponse::new(format!("Test e-mail sent to {}", to))))
}
