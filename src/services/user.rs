//! User service
//!
//! Registration, login and sessions, profile changes and the admin
//! operations on accounts. Two rules are enforced here rather than in the
//! handlers:
//! - banned users cannot log in, and banning ends their sessions
//! - the last active admin cannot be demoted, banned or deleted

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::{LoginLogRepository, SessionRepository, UserRepository};
use crate::models::{
    ClientInfo, CreateUserInput, ListParams, LoginLog, NewNotification, NotificationKind,
    PagedResult, Permission, Session, UpdateProfileInput, User, UserFilter, UserRole, UserStatus,
};
use crate::services::notification::NotificationService;
use crate::services::password::{generate_token, hash_password, validate_password_strength, verify_password};
use crate::services::rate_limiter::{RateAction, RateLimited, RateLimiter};
use crate::services::story::STORY_CACHE_PATTERN;
use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use uuid::Uuid;

/// Default session expiration time in days
const DEFAULT_SESSION_EXPIRATION_DAYS: i64 = 7;

const MAX_DISPLAY_NAME_LENGTH: usize = 64;
const MAX_BIO_LENGTH: usize = 1000;

static USERNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{3,32}$").expect("valid username regex"));

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Error types for user service operations
#[derive(Debug, thiserror::Error)]
pub enum UserServiceError {
    /// Invalid credentials; never says which part was wrong
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("This account has been banned")]
    AccountBanned,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    #[error("User not found")]
    NotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The operation would leave the site without an active admin
    #[error("The last active administrator cannot be demoted, banned or deleted")]
    LastAdmin,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Input for user registration
#[derive(Debug, Clone)]
pub struct RegisterInput {
    pub username: String,
    pub email: String,
    pub password: String,
    pub preferred_language: Option<String>,
}

impl RegisterInput {
    pub fn new(username: impl Into<String>, email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
            preferred_language: None,
        }
    }
}

/// Input for user login
#[derive(Debug, Clone)]
pub struct LoginInput {
    pub username_or_email: String,
    pub password: String,
}

impl LoginInput {
    pub fn new(username_or_email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username_or_email: username_or_email.into(),
            password: password.into(),
        }
    }
}

/// User service for managing users and authentication
pub struct UserService {
    user_repo: Arc<dyn UserRepository>,
    session_repo: Arc<dyn SessionRepository>,
    login_logs: Arc<dyn LoginLogRepository>,
    rate_limiter: Arc<RateLimiter>,
    notifications: Option<Arc<NotificationService>>,
    /// Holds story pages that show the author's public name
    cache: Option<Arc<Cache>>,
    /// Accepted `preferred_language` values; empty accepts any code
    languages: Vec<String>,
    session_expiration_days: i64,
}

impl UserService {
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        session_repo: Arc<dyn SessionRepository>,
        login_logs: Arc<dyn LoginLogRepository>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            user_repo,
            session_repo,
            login_logs,
            rate_limiter,
            notifications: None,
            cache: None,
            languages: Vec::new(),
            session_expiration_days: DEFAULT_SESSION_EXPIRATION_DAYS,
        }
    }

    pub fn with_session_expiration(mut self, days: i64) -> Self {
        self.session_expiration_days = days;
        self
    }

    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    pub fn with_notifications(mut self, notifications: Arc<NotificationService>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Register a new member.
    ///
    /// The first account of the site becomes its admin. Registrations are
    /// rate limited per client IP.
    pub async fn register(&self, input: RegisterInput, client: &ClientInfo) -> Result<User, UserServiceError> {
        let username = input.username.trim().to_string();
        let email = input.email.trim().to_lowercase();

        if !USERNAME_RE.is_match(&username) {
            return Err(UserServiceError::ValidationError(
                "Username must be 3 to 32 letters, digits, '_' or '-'".to_string(),
            ));
        }
        if !EMAIL_RE.is_match(&email) {
            return Err(UserServiceError::ValidationError("Invalid email format".to_string()));
        }
        validate_password_strength(&input.password)
            .map_err(|reason| UserServiceError::ValidationError(reason.to_string()))?;
        let preferred_language = match input.preferred_language {
            Some(language) if !language.trim().is_empty() => Some(self.validate_language(&language)?),
            _ => None,
        };

        if let Some(ip) = &client.ip_address {
            self.rate_limiter.hit(RateAction::Register, ip).await?;
        }

        if self
            .user_repo
            .get_by_username(&username)
            .await
            .context("Failed to check username")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!(
                "Username '{}' is already taken",
                username
            )));
        }
        if self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to check email")?
            .is_some()
        {
            return Err(UserServiceError::UserExists(format!(
                "Email '{}' is already registered",
                email
            )));
        }

        let role = if self.is_first_user().await? {
            UserRole::Admin
        } else {
            UserRole::Member
        };
        let password_hash = hash_password(&input.password).context("Failed to hash password")?;

        let user = self
            .user_repo
            .create(&CreateUserInput {
                username,
                email,
                password_hash,
                role,
                preferred_language,
            })
            .await
            .context("Failed to create user")?;

        tracing::info!("Registered user {} ({}) as {}", user.username, user.id, user.role);
        Ok(user)
    }

    /// Log in with a username or e-mail address.
    ///
    /// Every attempt lands in the login log. Failed attempts count against
    /// the per-username and per-IP limits; a successful login clears the
    /// per-username counter.
    pub async fn login(&self, input: LoginInput, client: &ClientInfo) -> Result<(User, Session), UserServiceError> {
        let login = input.username_or_email.trim();

        if let Err(limited) = self.check_login_limits(login, client).await {
            self.log_attempt(None, login, client, false, Some("rate_limited")).await;
            return Err(limited.into());
        }

        let Some(user) = self
            .user_repo
            .get_by_login(login)
            .await
            .context("Failed to find user")?
        else {
            self.record_failure(login, client).await;
            self.log_attempt(None, login, client, false, Some("unknown_user")).await;
            return Err(invalid_credentials());
        };

        let password_valid = verify_password(&input.password, &user.password_hash)
            .context("Failed to verify password")?;
        if !password_valid {
            self.record_failure(login, client).await;
            self.log_attempt(Some(user.id), login, client, false, Some("invalid_password")).await;
            return Err(invalid_credentials());
        }

        if user.is_banned() {
            self.log_attempt(Some(user.id), login, client, false, Some("banned")).await;
            return Err(UserServiceError::AccountBanned);
        }

        self.rate_limiter.reset(RateAction::Login, login).await;
        let session = self.create_session(user.id, client).await?;
        self.user_repo
            .touch_last_login(user.id)
            .await
            .context("Failed to update last login")?;
        self.log_attempt(Some(user.id), login, client, true, None).await;

        tracing::info!("User {} logged in", user.username);
        Ok((user, session))
    }

    /// Invalidate one session
    pub async fn logout(&self, session_id: &str) -> Result<(), UserServiceError> {
        self.session_repo
            .delete(session_id)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }

    /// Resolve a session token to its user.
    ///
    /// Expired sessions are deleted. Sessions of banned or deleted users are
    /// rejected and removed.
    pub async fn validate_session(&self, token: &str) -> Result<Option<(User, Session)>, UserServiceError> {
        let Some(session) = self
            .session_repo
            .get_by_id(token)
            .await
            .context("Failed to get session")?
        else {
            return Ok(None);
        };

        if session.is_expired() {
            self.session_repo
                .delete(token)
                .await
                .context("Failed to delete expired session")?;
            return Ok(None);
        }

        match self
            .user_repo
            .get_by_id(session.user_id)
            .await
            .context("Failed to get user")?
        {
            Some(user) if user.is_active() => Ok(Some((user, session))),
            Some(user) => {
                self.session_repo
                    .delete_by_user(user.id)
                    .await
                    .context("Failed to delete banned user's sessions")?;
                Ok(None)
            }
            None => {
                self.session_repo
                    .delete(token)
                    .await
                    .context("Failed to delete orphaned session")?;
                Ok(None)
            }
        }
    }

    /// Delete all expired sessions, returning how many were removed
    pub async fn cleanup_expired_sessions(&self) -> Result<u64, UserServiceError> {
        let count = self
            .session_repo
            .delete_expired()
            .await
            .context("Failed to delete expired sessions")?;
        Ok(count)
    }

    pub async fn is_first_user(&self) -> Result<bool, UserServiceError> {
        let count = self.user_repo.count().await.context("Failed to count users")?;
        Ok(count == 0)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, UserServiceError> {
        Ok(self
            .user_repo
            .get_by_id(id)
            .await
            .context("Failed to get user by ID")?)
    }

    pub async fn get_user(&self, id: i64) -> Result<User, UserServiceError> {
        self.get_by_id(id).await?.ok_or(UserServiceError::NotFound)
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>, UserServiceError> {
        Ok(self
            .user_repo
            .get_by_username(username)
            .await
            .context("Failed to get user by username")?)
    }

    pub async fn update_profile(&self, user_id: i64, input: UpdateProfileInput) -> Result<User, UserServiceError> {
        let display_name = input
            .display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        if display_name
            .as_ref()
            .is_some_and(|name| name.chars().count() > MAX_DISPLAY_NAME_LENGTH)
        {
            return Err(UserServiceError::ValidationError(format!(
                "Display name cannot exceed {} characters",
                MAX_DISPLAY_NAME_LENGTH
            )));
        }
        let bio = input
            .bio
            .map(|bio| bio.trim().to_string())
            .filter(|bio| !bio.is_empty());
        if bio.as_ref().is_some_and(|bio| bio.chars().count() > MAX_BIO_LENGTH) {
            return Err(UserServiceError::ValidationError(format!(
                "Bio cannot exceed {} characters",
                MAX_BIO_LENGTH
            )));
        }
        let preferred_language = match input.preferred_language {
            Some(language) if !language.trim().is_empty() => Some(self.validate_language(&language)?),
            _ => None,
        };

        self.get_user(user_id).await?;
        self.user_repo
            .update_profile(
                user_id,
                &UpdateProfileInput {
                    display_name,
                    bio,
                    preferred_language,
                },
            )
            .await
            .context("Failed to update profile")?;
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete_pattern(STORY_CACHE_PATTERN).await {
                tracing::warn!("Failed to invalidate story cache: {}", e);
            }
        }
        self.get_user(user_id).await
    }

    /// Change a password after checking the current one.
    ///
    /// Every other session of the user is logged out.
    pub async fn change_password(
        &self,
        user_id: i64,
        current_session: &str,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), UserServiceError> {
        let user = self.get_user(user_id).await?;
        let valid = verify_password(current_password, &user.password_hash)
            .context("Failed to verify password")?;
        if !valid {
            return Err(UserServiceError::AuthenticationError(
                "Current password is incorrect".to_string(),
            ));
        }
        validate_password_strength(new_password)
            .map_err(|reason| UserServiceError::ValidationError(reason.to_string()))?;

        let password_hash = hash_password(new_password).context("Failed to hash password")?;
        self.user_repo
            .update_password(user_id, &password_hash)
            .await
            .context("Failed to update password")?;
        let ended = self
            .session_repo
            .delete_by_user_except(user_id, current_session)
            .await
            .context("Failed to end other sessions")?;

        tracing::info!("User {} changed password, {} other sessions ended", user.username, ended);
        Ok(())
    }

    // ========================================================================
    // Administration
    // ========================================================================

    pub async fn list_users(
        &self,
        actor: &User,
        filter: &UserFilter,
        params: &ListParams,
    ) -> Result<PagedResult<User>, UserServiceError> {
        require(actor, Permission::ManageUsers)?;
        let (users, total) = self
            .user_repo
            .list(filter, params)
            .await
            .context("Failed to list users")?;
        Ok(PagedResult::new(users, total, params))
    }

    /// Change a user's role. The last active admin keeps the admin role.
    pub async fn change_role(&self, actor: &User, target_id: i64, role: UserRole) -> Result<User, UserServiceError> {
        require(actor, Permission::ManageUsers)?;
        let target = self.get_user(target_id).await?;
        if target.role == role {
            return Ok(target);
        }
        if target.is_admin() && target.is_active() && role != UserRole::Admin {
            self.ensure_other_admin().await?;
        }

        self.user_repo
            .update_role(target.id, role)
            .await
            .context("Failed to update role")?;
        tracing::info!(
            "User {} changed role of {} from {} to {}",
            actor.username,
            target.username,
            target.role,
            role
        );

        self.notify(NewNotification::new(
            target.id,
            NotificationKind::RoleChanged,
            "Your role has changed",
            format!("Your role is now {}.", role),
        ))
        .await;
        self.get_user(target.id).await
    }

    /// Ban a user and end all of their sessions
    pub async fn ban(&self, actor: &User, target_id: i64) -> Result<User, UserServiceError> {
        require(actor, Permission::ManageUsers)?;
        if actor.id == target_id {
            return Err(UserServiceError::Forbidden("You cannot ban yourself".to_string()));
        }
        let target = self.get_user(target_id).await?;
        if target.is_banned() {
            return Ok(target);
        }
        if target.is_admin() {
            self.ensure_other_admin().await?;
        }

        self.user_repo
            .update_status(target.id, UserStatus::Banned)
            .await
            .context("Failed to ban user")?;
        let ended = self
            .session_repo
            .delete_by_user(target.id)
            .await
            .context("Failed to end sessions")?;
        tracing::warn!(
            "User {} banned {} ({} sessions ended)",
            actor.username,
            target.username,
            ended
        );
        self.get_user(target.id).await
    }

    pub async fn unban(&self, actor: &User, target_id: i64) -> Result<User, UserServiceError> {
        require(actor, Permission::ManageUsers)?;
        let target = self.get_user(target_id).await?;
        if target.is_active() {
            return Ok(target);
        }
        self.user_repo
            .update_status(target.id, UserStatus::Active)
            .await
            .context("Failed to unban user")?;
        tracing::info!("User {} unbanned {}", actor.username, target.username);
        self.get_user(target.id).await
    }

    pub async fn set_verified(&self, actor: &User, target_id: i64, verified: bool) -> Result<User, UserServiceError> {
        require(actor, Permission::ManageUsers)?;
        let target = self.get_user(target_id).await?;
        self.user_repo
            .set_verified(target.id, verified)
            .await
            .context("Failed to update verification")?;
        self.get_user(target.id).await
    }

    pub async fn set_premium(&self, actor: &User, target_id: i64, premium: bool) -> Result<User, UserServiceError> {
        require(actor, Permission::ManageUsers)?;
        let target = self.get_user(target_id).await?;
        self.user_repo
            .set_premium(target.id, premium)
            .await
            .context("Failed to update premium flag")?;
        self.get_user(target.id).await
    }

    /// Delete an account. Authors keep their account while they own stories.
    pub async fn delete_user(&self, actor: &User, target_id: i64) -> Result<(), UserServiceError> {
        require(actor, Permission::ManageUsers)?;
        if actor.id == target_id {
            return Err(UserServiceError::Forbidden(
                "You cannot delete your own account".to_string(),
            ));
        }
        let target = self.get_user(target_id).await?;
        if target.is_admin() && target.is_active() {
            self.ensure_other_admin().await?;
        }
        let stories = self
            .user_repo
            .story_count(target.id)
            .await
            .context("Failed to count stories")?;
        if stories > 0 {
            return Err(UserServiceError::Conflict(format!(
                "{} still owns {} stories",
                target.username, stories
            )));
        }

        self.user_repo.delete(target.id).await.context("Failed to delete user")?;
        tracing::warn!("User {} deleted account {}", actor.username, target.username);
        Ok(())
    }

    pub async fn recent_logins(&self, actor: &User, limit: i64) -> Result<Vec<LoginLog>, UserServiceError> {
        require(actor, Permission::ManageUsers)?;
        Ok(self
            .login_logs
            .recent(limit.clamp(1, 500))
            .await
            .context("Failed to list login attempts")?)
    }

    pub async fn failed_logins_since(&self, since: DateTime<Utc>) -> Result<i64, UserServiceError> {
        Ok(self
            .login_logs
            .count_failures_since(since)
            .await
            .context("Failed to count failed logins")?)
    }

    // ========================================================================
    // Private helper methods
    // ========================================================================

    fn validate_language(&self, language: &str) -> Result<String, UserServiceError> {
        let language = language.trim().to_lowercase();
        let well_formed = language.len() <= 10
            && language.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        let supported = self.languages.is_empty() || self.languages.iter().any(|l| *l == language);
        if !well_formed || !supported {
            return Err(UserServiceError::ValidationError(format!(
                "Unsupported language '{}'",
                language
            )));
        }
        Ok(language)
    }

    async fn ensure_other_admin(&self) -> Result<(), UserServiceError> {
        let admins = self
            .user_repo
            .count_active_admins()
            .await
            .context("Failed to count admins")?;
        if admins <= 1 {
            return Err(UserServiceError::LastAdmin);
        }
        Ok(())
    }

    async fn check_login_limits(&self, login: &str, client: &ClientInfo) -> Result<(), RateLimited> {
        self.rate_limiter.check(RateAction::Login, login).await?;
        if let Some(ip) = &client.ip_address {
            self.rate_limiter.check(RateAction::LoginIp, ip).await?;
        }
        Ok(())
    }

    async fn record_failure(&self, login: &str, client: &ClientInfo) {
        self.rate_limiter.record(RateAction::Login, login).await;
        if let Some(ip) = &client.ip_address {
            self.rate_limiter.record(RateAction::LoginIp, ip).await;
        }
    }

    /// The audit log must not turn a login into an error
    async fn log_attempt(
        &self,
        user_id: Option<i64>,
        login: &str,
        client: &ClientInfo,
        success: bool,
        failure_reason: Option<&str>,
    ) {
        if let Err(e) = self
            .login_logs
            .record(user_id, login, client, success, failure_reason)
            .await
        {
            tracing::error!("Failed to record login attempt: {:#}", e);
        }
    }

    async fn notify(&self, notification: NewNotification) {
        if let Some(notifications) = &self.notifications {
            if let Err(e) = notifications.notify(notification).await {
                tracing::warn!("Failed to send notification: {}", e);
            }
        }
    }

    async fn create_session(&self, user_id: i64, client: &ClientInfo) -> Result<Session, UserServiceError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id,
            csrf_token: generate_token(32)?,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            expires_at: now + Duration::days(self.session_expiration_days),
            created_at: now,
        };
        self.session_repo
            .create(&session)
            .await
            .context("Failed to create session")?;
        Ok(session)
    }
}

fn invalid_credentials() -> UserServiceError {
    UserServiceError::AuthenticationError("Invalid username or password".to_string())
}

fn require(actor: &User, permission: Permission) -> Result<(), UserServiceError> {
    if actor.has_permission(permission) {
        Ok(())
    } else {
        Err(UserServiceError::Forbidden(format!("Missing permission {}", permission)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitRule, SecurityConfig};
    use crate::db::repositories::{
        SqlxLoginLogRepository, SqlxNotificationRepository, SqlxSessionRepository,
        SqlxStoryRepository, SqlxUserRepository, StoryRepository,
    };
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::models::{AccessLevel, NewStory, NewStoryContent};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    const PASSWORD: &str = "kidney2024";

    async fn setup_test_service() -> (DynDatabasePool, UserService) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");

        let user_repo = SqlxUserRepository::boxed(pool.clone());
        let notifications = Arc::new(NotificationService::new(
            SqlxNotificationRepository::boxed(pool.clone()),
            user_repo.clone(),
        ));
        let service = UserService::new(
            user_repo,
            SqlxSessionRepository::boxed(pool.clone()),
            SqlxLoginLogRepository::boxed(pool.clone()),
            Arc::new(RateLimiter::default()),
        )
        .with_languages(vec!["en".into(), "es".into()])
        .with_notifications(notifications);

        (pool, service)
    }

    fn client() -> ClientInfo {
        ClientInfo {
            ip_address: Some("192.0.2.10".into()),
            user_agent: Some("test".into()),
        }
    }

    async fn register(service: &UserService, name: &str) -> User {
        service
            .register(
                RegisterInput::new(name, format!("{}@example.com", name), PASSWORD),
                &ClientInfo::default(),
            )
            .await
            .expect("Failed to register")
    }

    // ========================================================================
    // Registration tests
    // ========================================================================

    #[tokio::test]
    async fn test_register_first_user_becomes_admin() {
        let (_pool, service) = setup_test_service().await;
        let admin = register(&service, "admin").await;
        let member = register(&service, "maria").await;

        assert_eq!(admin.role, UserRole::Admin);
        assert_eq!(member.role, UserRole::Member);
        assert_ne!(member.password_hash, PASSWORD);
    }

    #[tokio::test]
    async fn test_register_normalizes_email() {
        let (_pool, service) = setup_test_service().await;
        let user = service
            .register(
                RegisterInput::new("  jose ", " Jose@Example.COM ", PASSWORD),
                &ClientInfo::default(),
            )
            .await
            .unwrap();
        assert_eq!(user.username, "jose");
        assert_eq!(user.email, "jose@example.com");
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (_pool, service) = setup_test_service().await;
        let cases = [
            RegisterInput::new("ab", "ab@example.com", PASSWORD),
            RegisterInput::new("has space", "s@example.com", PASSWORD),
            RegisterInput::new("valid", "not-an-email", PASSWORD),
            RegisterInput::new("valid", "valid@example.com", "short1"),
            RegisterInput::new("valid", "valid@example.com", "lettersonly"),
            RegisterInput {
                preferred_language: Some("xx".into()),
                ..RegisterInput::new("valid", "valid@example.com", PASSWORD)
            },
        ];
        for input in cases {
            let result = service.register(input.clone(), &ClientInfo::default()).await;
            assert!(
                matches!(result, Err(UserServiceError::ValidationError(_))),
                "{:?} should be rejected",
                input
            );
        }
    }

    #[tokio::test]
    async fn test_register_duplicates_fail() {
        let (_pool, service) = setup_test_service().await;
        register(&service, "ana").await;

        let same_name = RegisterInput::new("ana", "other@example.com", PASSWORD);
        assert!(matches!(
            service.register(same_name, &ClientInfo::default()).await,
            Err(UserServiceError::UserExists(_))
        ));
        let same_email = RegisterInput::new("other", "ANA@example.com", PASSWORD);
        assert!(matches!(
            service.register(same_email, &ClientInfo::default()).await,
            Err(UserServiceError::UserExists(_))
        ));
    }

    #[tokio::test]
    async fn test_register_rate_limited_per_ip() {
        let (_pool, service) = setup_test_service().await;
        let config = SecurityConfig {
            register: RateLimitRule::new(1, 3600),
            ..SecurityConfig::default()
        };
        let service = UserService {
            rate_limiter: Arc::new(RateLimiter::new(&config)),
            ..service
        };
        service
            .register(RegisterInput::new("first", "first@example.com", PASSWORD), &client())
            .await
            .unwrap();
        assert!(matches!(
            service
                .register(RegisterInput::new("second", "second@example.com", PASSWORD), &client())
                .await,
            Err(UserServiceError::RateLimited(_))
        ));
    }

    // ========================================================================
    // Login and session tests
    // ========================================================================

    #[tokio::test]
    async fn test_login_with_username_or_email() {
        let (_pool, service) = setup_test_service().await;
        let user = register(&service, "ana").await;

        let (logged_in, session) = service
            .login(LoginInput::new("ana", PASSWORD), &client())
            .await
            .unwrap();
        assert_eq!(logged_in.id, user.id);
        assert_eq!(session.csrf_token.len(), 64);
        assert_eq!(session.ip_address.as_deref(), Some("192.0.2.10"));

        let (_, by_email) = service
            .login(LoginInput::new("ana@example.com", PASSWORD), &client())
            .await
            .unwrap();
        assert_ne!(by_email.id, session.id);

        let refreshed = service.get_user(user.id).await.unwrap();
        assert!(refreshed.last_login_at.is_some());
    }

    #[tokio::test]
    async fn test_login_failures_are_logged() {
        let (_pool, service) = setup_test_service().await;
        let admin = register(&service, "admin").await;

        assert!(matches!(
            service.login(LoginInput::new("admin", "wrong-pass1"), &client()).await,
            Err(UserServiceError::AuthenticationError(_))
        ));
        assert!(matches!(
            service.login(LoginInput::new("ghost", PASSWORD), &client()).await,
            Err(UserServiceError::AuthenticationError(_))
        ));
        service.login(LoginInput::new("admin", PASSWORD), &client()).await.unwrap();

        let logs = service.recent_logins(&admin, 10).await.unwrap();
        assert_eq!(logs.len(), 3);
        assert!(logs[0].success);
        assert_eq!(logs[1].failure_reason.as_deref(), Some("unknown_user"));
        assert_eq!(logs[2].failure_reason.as_deref(), Some("invalid_password"));
        let since = Utc::now() - Duration::hours(1);
        assert_eq!(service.failed_logins_since(since).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_login_rate_limited_after_failures() {
        let (_pool, service) = setup_test_service().await;
        register(&service, "ana").await;

        for _ in 0..5 {
            let _ = service.login(LoginInput::new("ana", "wrong-pass1"), &client()).await;
        }
        // Correct password is still refused while the window is full
        assert!(matches!(
            service.login(LoginInput::new("ana", PASSWORD), &client()).await,
            Err(UserServiceError::RateLimited(_))
        ));
    }

    #[tokio::test]
    async fn test_banned_user_cannot_login_and_loses_sessions() {
        let (_pool, service) = setup_test_service().await;
        let admin = register(&service, "admin").await;
        let member = register(&service, "maria").await;
        let (_, session) = service
            .login(LoginInput::new("maria", PASSWORD), &client())
            .await
            .unwrap();

        let banned = service.ban(&admin, member.id).await.unwrap();
        assert!(banned.is_banned());
        assert!(service.validate_session(&session.id).await.unwrap().is_none());
        assert!(matches!(
            service.login(LoginInput::new("maria", PASSWORD), &client()).await,
            Err(UserServiceError::AccountBanned)
        ));

        service.unban(&admin, member.id).await.unwrap();
        assert!(service.login(LoginInput::new("maria", PASSWORD), &client()).await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_session_and_logout() {
        let (_pool, service) = setup_test_service().await;
        let user = register(&service, "ana").await;
        let (_, session) = service
            .login(LoginInput::new("ana", PASSWORD), &client())
            .await
            .unwrap();

        let (validated, validated_session) = service.validate_session(&session.id).await.unwrap().unwrap();
        assert_eq!(validated.id, user.id);
        assert_eq!(validated_session.csrf_token, session.csrf_token);

        service.logout(&session.id).await.unwrap();
        assert!(service.validate_session(&session.id).await.unwrap().is_none());
        assert!(service.validate_session("no-such-token").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_sessions() {
        let (_pool, service) = setup_test_service().await;
        register(&service, "ana").await;
        let service = service.with_session_expiration(-1);
        let (_, expired) = service
            .login(LoginInput::new("ana", PASSWORD), &client())
            .await
            .unwrap();
        service
            .login(LoginInput::new("ana", PASSWORD), &client())
            .await
            .unwrap();

        assert!(service.validate_session(&expired.id).await.unwrap().is_none());
        assert_eq!(service.cleanup_expired_sessions().await.unwrap(), 1);
    }

    // ========================================================================
    // Profile tests
    // ========================================================================

    #[tokio::test]
    async fn test_update_profile() {
        let (_pool, service) = setup_test_service().await;
        let user = register(&service, "ana").await;

        let updated = service
            .update_profile(
                user.id,
                UpdateProfileInput {
                    display_name: Some(" Ana María ".into()),
                    bio: Some("Transplant recipient since 2019".into()),
                    preferred_language: Some("ES".into()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.public_name(), "Ana María");
        assert_eq!(updated.preferred_language.as_deref(), Some("es"));

        let too_long = UpdateProfileInput {
            display_name: Some("x".repeat(65)),
            ..UpdateProfileInput::default()
        };
        assert!(matches!(
            service.update_profile(user.id, too_long).await,
            Err(UserServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_change_password_ends_other_sessions() {
        let (_pool, service) = setup_test_service().await;
        let user = register(&service, "ana").await;
        let (_, current) = service.login(LoginInput::new("ana", PASSWORD), &client()).await.unwrap();
        let (_, other) = service.login(LoginInput::new("ana", PASSWORD), &client()).await.unwrap();

        assert!(matches!(
            service.change_password(user.id, &current.id, "wrong-pass1", "newpass123").await,
            Err(UserServiceError::AuthenticationError(_))
        ));
        service
            .change_password(user.id, &current.id, PASSWORD, "newpass123")
            .await
            .unwrap();

        assert!(service.validate_session(&current.id).await.unwrap().is_some());
        assert!(service.validate_session(&other.id).await.unwrap().is_none());
        assert!(service.login(LoginInput::new("ana", "newpass123"), &client()).await.is_ok());
    }

    // ========================================================================
    // Administration tests
    // ========================================================================

    #[tokio::test]
    async fn test_last_admin_cannot_be_demoted() {
        let (_pool, service) = setup_test_service().await;
        let admin = register(&service, "admin").await;

        assert!(matches!(
            service.change_role(&admin, admin.id, UserRole::Member).await,
            Err(UserServiceError::LastAdmin)
        ));

        let second = register(&service, "second").await;
        service.change_role(&admin, second.id, UserRole::Admin).await.unwrap();
        let demoted = service.change_role(&admin, admin.id, UserRole::Moderator).await.unwrap();
        assert_eq!(demoted.role, UserRole::Moderator);

        let second = service.get_user(second.id).await.unwrap();
        assert!(matches!(
            service.change_role(&second, second.id, UserRole::Member).await,
            Err(UserServiceError::LastAdmin)
        ));
    }

    #[tokio::test]
    async fn test_role_change_notifies_user() {
        let (pool, service) = setup_test_service().await;
        let admin = register(&service, "admin").await;
        let member = register(&service, "maria").await;
        service.change_role(&admin, member.id, UserRole::Moderator).await.unwrap();

        let notifications = SqlxNotificationRepository::new(pool);
        use crate::db::repositories::NotificationRepository;
        assert_eq!(notifications.unread_count(member.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_admin_operations_require_permission() {
        let (_pool, service) = setup_test_service().await;
        let admin = register(&service, "admin").await;
        let member = register(&service, "maria").await;

        assert!(matches!(
            service.ban(&member, admin.id).await,
            Err(UserServiceError::Forbidden(_))
        ));
        assert!(matches!(
            service.list_users(&member, &UserFilter::default(), &ListParams::default()).await,
            Err(UserServiceError::Forbidden(_))
        ));
        assert!(matches!(
            service.ban(&admin, admin.id).await,
            Err(UserServiceError::Forbidden(_))
        ));

        let page = service
            .list_users(&admin, &UserFilter::default(), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);
    }

    #[tokio::test]
    async fn test_verified_and_premium_flags() {
        let (_pool, service) = setup_test_service().await;
        let admin = register(&service, "admin").await;
        let member = register(&service, "maria").await;

        let updated = service.set_verified(&admin, member.id, true).await.unwrap();
        assert!(updated.is_verified);
        let updated = service.set_premium(&admin, member.id, true).await.unwrap();
        assert!(updated.is_premium);
        assert!(matches!(
            service.set_premium(&admin, 9999, true).await,
            Err(UserServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_delete_user_rules() {
        let (pool, service) = setup_test_service().await;
        let admin = register(&service, "admin").await;
        let author = register(&service, "author").await;
        let reader = register(&service, "reader").await;

        SqlxStoryRepository::new(pool)
            .create(&NewStory {
                author_id: author.id,
                category_id: None,
                slug: "my-story".into(),
                access_level: AccessLevel::Public,
                original_language: "en".into(),
                content: NewStoryContent {
                    language: "en".into(),
                    title: "My story".into(),
                    summary: None,
                    body: "b".into(),
                    body_html: "<p>b</p>".into(),
                    translator_id: None,
                },
            })
            .await
            .unwrap();

        assert!(matches!(
            service.delete_user(&admin, admin.id).await,
            Err(UserServiceError::Forbidden(_))
        ));
        assert!(matches!(
            service.delete_user(&admin, author.id).await,
            Err(UserServiceError::Conflict(_))
        ));
        service.delete_user(&admin, reader.id).await.unwrap();
        assert!(service.get_by_id(reader.id).await.unwrap().is_none());
    }

    // ========================================================================
    // Property tests
    // ========================================================================

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(10))]

        /// Registering and logging in yields a session that resolves to the same user
        #[test]
        fn property_user_auth_roundtrip(
            username in "[a-z]{3,10}",
            password in "[a-z]{6,12}[0-9]{2}"
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let result: Result<(), TestCaseError> = rt.block_on(async {
                let (_pool, service) = setup_test_service().await;
                let suffix = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
                let username = format!("{}_{}", username, suffix);

                let registered = service
                    .register(
                        RegisterInput::new(username.clone(), format!("{}@example.com", username), password.clone()),
                        &ClientInfo::default(),
                    )
                    .await
                    .expect("Registration should succeed");
                let (_, session) = service
                    .login(LoginInput::new(username.clone(), password.clone()), &ClientInfo::default())
                    .await
                    .expect("Login should succeed");
                let (validated, _) = service
                    .validate_session(&session.id)
                    .await
                    .expect("Validation should not error")
                    .expect("Session should be valid");

                prop_assert_eq!(validated.id, registered.id);
                prop_assert_eq!(validated.username, registered.username);
                Ok(())
            });
            result?;
        }
    }
}
