//! Application wiring
//!
//! Builds every repository and service from a configuration and a migrated
//! pool, and starts the periodic maintenance tasks.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::api::AppState;
use crate::cache::create_cache;
use crate::config::Config;
use crate::db::repositories::{
    SqlxCategoryRepository, SqlxCommentRepository, SqlxLoginLogRepository,
    SqlxNotificationRepository, SqlxSessionRepository, SqlxSettingsRepository,
    SqlxStatisticsRepository, SqlxStoryRepository, SqlxTagRepository, SqlxTranslationRepository,
    SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::services::{
    CategoryService, CommentService, DatabaseBackupManager, EmailService, I18nService,
    NotificationService, RateLimiter, RequestStats, SettingsService, StatisticsService,
    StoryService, TagService, UserService,
};
use crate::view::ViewEngine;

const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const SESSION_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);
const NOTIFICATION_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 3600);
/// Read notifications older than this are pruned
const NOTIFICATION_RETENTION_DAYS: i64 = 90;

/// Build the shared state for a migrated database
pub fn build_state(config: Config, pool: DynDatabasePool) -> Result<AppState> {
    let cache = create_cache(&config.cache);

    let user_repo = SqlxUserRepository::boxed(pool.clone());
    let story_repo = SqlxStoryRepository::boxed(pool.clone());
    let category_repo = SqlxCategoryRepository::boxed(pool.clone());

    let rate_limiter = Arc::new(RateLimiter::new(&config.security));
    let request_stats = Arc::new(RequestStats::new());

    let settings_service = Arc::new(SettingsService::new(
        SqlxSettingsRepository::boxed(pool.clone()),
        cache.clone(),
        &config.site.name,
    ));
    let email_service = Arc::new(EmailService::new(settings_service.clone()));
    let notification_service = Arc::new(
        NotificationService::new(SqlxNotificationRepository::boxed(pool.clone()), user_repo.clone())
            .with_email(email_service.clone(), &config.site.base_url),
    );
    let user_service = Arc::new(
        UserService::new(
            user_repo.clone(),
            SqlxSessionRepository::boxed(pool.clone()),
            SqlxLoginLogRepository::boxed(pool.clone()),
            rate_limiter.clone(),
        )
        .with_session_expiration(config.security.session_days)
        .with_languages(config.i18n.supported_languages.clone())
        .with_notifications(notification_service.clone())
        .with_cache(cache.clone()),
    );
    let tag_service = Arc::new(TagService::new(SqlxTagRepository::boxed(pool.clone())));
    let category_service = Arc::new(CategoryService::new(category_repo.clone(), cache.clone()));
    let story_service = Arc::new(StoryService::new(
        story_repo.clone(),
        user_repo.clone(),
        category_repo,
        tag_service.clone(),
        notification_service.clone(),
        rate_limiter.clone(),
        cache.clone(),
        config.i18n.clone(),
    ));
    let comment_service = Arc::new(CommentService::new(
        SqlxCommentRepository::boxed(pool.clone()),
        story_repo,
        user_repo,
        settings_service.clone(),
        notification_service.clone(),
        rate_limiter.clone(),
    ));
    let i18n_service = Arc::new(I18nService::new(
        SqlxTranslationRepository::boxed(pool.clone()),
        cache,
        config.i18n.clone(),
    ));
    let statistics_service = Arc::new(StatisticsService::new(
        SqlxStatisticsRepository::boxed(pool.clone()),
        request_stats.clone(),
    ));
    let backup_manager = Arc::new(DatabaseBackupManager::new(
        pool.clone(),
        config.database.clone(),
        config.backup.clone(),
    ));
    let view = Arc::new(ViewEngine::new()?);

    Ok(AppState {
        pool,
        config: Arc::new(config),
        user_service,
        story_service,
        comment_service,
        category_service,
        tag_service,
        notification_service,
        settings_service,
        email_service,
        i18n_service,
        statistics_service,
        backup_manager,
        rate_limiter,
        view,
        request_stats,
    })
}

/// Start periodic cleanup of rate-limit windows, sessions and notifications
pub fn spawn_background_tasks(state: &AppState) {
    let limiter = state.rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(RATE_LIMIT_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            limiter.cleanup().await;
        }
    });

    let users = state.user_service.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SESSION_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            match users.cleanup_expired_sessions().await {
                Ok(0) => {}
                Ok(removed) => tracing::info!("Removed {} expired sessions", removed),
                Err(e) => tracing::warn!("Session cleanup failed: {}", e),
            }
        }
    });

    let notifications = state.notification_service.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(NOTIFICATION_CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = notifications.prune_older_than(NOTIFICATION_RETENTION_DAYS).await {
                tracing::warn!("Notification cleanup failed: {}", e);
            }
        }
    });
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    /// State over a fresh in-memory database
    pub async fn test_state() -> AppState {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let mut config = Config::default();
        config.backup.directory = std::env::temp_dir().join(format!("storyshare-test-{}", uuid::Uuid::new_v4()));
        build_state(config, pool).unwrap()
    }
}
