//! Settings service
//!
//! Typed access to the key/value `settings` table. The typed view is cached
//! under `settings:site` and dropped on every write.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::SettingsRepository;

const CACHE_KEY: &str = "settings:site";
const CACHE_TTL: Duration = Duration::from_secs(600);

/// Known setting keys
pub mod keys {
    pub const SITE_NAME: &str = "site_name";
    pub const SITE_DESCRIPTION: &str = "site_description";
    pub const REGISTRATION_OPEN: &str = "registration_open";
    pub const COMMENT_MODERATION: &str = "comment_moderation";
    pub const SMTP_HOST: &str = "smtp_host";
    pub const SMTP_PORT: &str = "smtp_port";
    pub const SMTP_USERNAME: &str = "smtp_username";
    pub const SMTP_PASSWORD: &str = "smtp_password";
    pub const SMTP_FROM: &str = "smtp_from";
}

/// Site settings editable from the admin panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteSettings {
    pub site_name: String,
    pub site_description: String,
    /// New members may sign up
    pub registration_open: bool,
    /// Comments of unverified members wait for approval
    pub comment_moderation: bool,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub smtp_from: String,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            site_name: "StoryShare".to_string(),
            site_description: String::new(),
            registration_open: true,
            comment_moderation: false,
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            smtp_from: String::new(),
        }
    }
}

impl SiteSettings {
    /// E-mail delivery needs a host and a sender address
    pub fn smtp_configured(&self) -> bool {
        !self.smtp_host.trim().is_empty() && !self.smtp_from.trim().is_empty()
    }

    fn from_map(map: &HashMap<String, String>, defaults: SiteSettings) -> Self {
        let text = |key: &str, default: String| map.get(key).cloned().unwrap_or(default);
        let flag = |key: &str, default: bool| {
            map.get(key)
                .map(|value| matches!(value.trim(), "true" | "1" | "yes" | "on"))
                .unwrap_or(default)
        };
        Self {
            site_name: map
                .get(keys::SITE_NAME)
                .filter(|name| !name.trim().is_empty())
                .cloned()
                .unwrap_or(defaults.site_name),
            site_description: text(keys::SITE_DESCRIPTION, defaults.site_description),
            registration_open: flag(keys::REGISTRATION_OPEN, defaults.registration_open),
            comment_moderation: flag(keys::COMMENT_MODERATION, defaults.comment_moderation),
            smtp_host: text(keys::SMTP_HOST, defaults.smtp_host),
            smtp_port: map
                .get(keys::SMTP_PORT)
                .and_then(|port| port.trim().parse().ok())
                .unwrap_or(defaults.smtp_port),
            smtp_username: text(keys::SMTP_USERNAME, defaults.smtp_username),
            smtp_password: text(keys::SMTP_PASSWORD, defaults.smtp_password),
            smtp_from: text(keys::SMTP_FROM, defaults.smtp_from),
        }
    }

    fn to_map(&self) -> HashMap<String, String> {
        HashMap::from([
            (keys::SITE_NAME.to_string(), self.site_name.clone()),
            (keys::SITE_DESCRIPTION.to_string(), self.site_description.clone()),
            (keys::REGISTRATION_OPEN.to_string(), self.registration_open.to_string()),
            (keys::COMMENT_MODERATION.to_string(), self.comment_moderation.to_string()),
            (keys::SMTP_HOST.to_string(), self.smtp_host.clone()),
            (keys::SMTP_PORT.to_string(), self.smtp_port.to_string()),
            (keys::SMTP_USERNAME.to_string(), self.smtp_username.clone()),
            (keys::SMTP_PASSWORD.to_string(), self.smtp_password.clone()),
            (keys::SMTP_FROM.to_string(), self.smtp_from.clone()),
        ])
    }
}

/// Settings service errors
#[derive(Debug, Error)]
pub enum SettingsServiceError {
    #[error("Invalid setting value: {0}")]
    InvalidValue(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Settings service for managing site configuration
pub struct SettingsService {
    repo: Arc<dyn SettingsRepository>,
    cache: Arc<Cache>,
    /// Site name from the configuration file, used until an admin sets one
    default_site_name: String,
}

impl SettingsService {
    pub fn new(repo: Arc<dyn SettingsRepository>, cache: Arc<Cache>, default_site_name: &str) -> Self {
        Self {
            repo,
            cache,
            default_site_name: default_site_name.to_string(),
        }
    }

    /// Typed site settings, falling back to defaults for missing keys
    pub async fn get_site_settings(&self) -> Result<SiteSettings, SettingsServiceError> {
        if let Ok(Some(settings)) = self.cache.get::<SiteSettings>(CACHE_KEY).await {
            return Ok(settings);
        }

        let map = self.repo.get_map().await.context("Failed to load settings")?;
        let defaults = SiteSettings {
            site_name: self.default_site_name.clone(),
            ..SiteSettings::default()
        };
        let settings = SiteSettings::from_map(&map, defaults);

        if let Err(e) = self.cache.set(CACHE_KEY, &settings, CACHE_TTL).await {
            tracing::warn!("Failed to cache site settings: {}", e);
        }
        Ok(settings)
    }

    pub async fn update_site_settings(&self, settings: &SiteSettings) -> Result<(), SettingsServiceError> {
        if settings.site_name.trim().is_empty() {
            return Err(SettingsServiceError::InvalidValue("site name cannot be empty".into()));
        }
        if settings.smtp_port == 0 {
            return Err(SettingsServiceError::InvalidValue("SMTP port must be positive".into()));
        }
        if !settings.smtp_from.is_empty() && !settings.smtp_from.contains('@') {
            return Err(SettingsServiceError::InvalidValue("SMTP sender must be an e-mail address".into()));
        }

        self.repo
            .set_many(&settings.to_map())
            .await
            .context("Failed to save settings")?;
        self.invalidate().await;
        tracing::info!("Site settings updated");
        Ok(())
    }

    /// Get a single raw setting value
    pub async fn get(&self, key: &str) -> Result<Option<String>, SettingsServiceError> {
        let setting = self.repo.get(key).await.context("Failed to load setting")?;
        Ok(setting.map(|s| s.value))
    }

    /// Set a single raw setting value
    pub async fn set(&self, key: &str, value: &str) -> Result<(), SettingsServiceError> {
        if key.trim().is_empty() {
            return Err(SettingsServiceError::InvalidValue("setting key cannot be empty".into()));
        }
        self.repo.set(key, value).await.context("Failed to save setting")?;
        self.invalidate().await;
        Ok(())
    }

    async fn invalidate(&self) {
        if let Err(e) = self.cache.delete(CACHE_KEY).await {
            tracing::warn!("Failed to invalidate settings cache: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::SqlxSettingsRepository;
    use crate::db::{create_test_pool, migrations};

    async fn setup() -> SettingsService {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        SettingsService::new(
            SqlxSettingsRepository::boxed(pool),
            Arc::new(MemoryCache::new()),
            "Kidney Stories",
        )
    }

    #[tokio::test]
    async fn test_seeded_settings() {
        let service = setup().await;
        let settings = service.get_site_settings().await.unwrap();
        assert_eq!(settings.site_name, "Kidney Stories");
        assert!(settings.registration_open);
        assert!(!settings.comment_moderation);
        assert_eq!(settings.smtp_port, 587);
        assert!(!settings.smtp_configured());
    }

    #[tokio::test]
    async fn test_update_invalidates_cache() {
        let service = setup().await;
        let mut settings = service.get_site_settings().await.unwrap();
        settings.registration_open = false;
        settings.comment_moderation = true;
        settings.smtp_host = "smtp.example.com".into();
        settings.smtp_from = "noreply@example.com".into();
        service.update_site_settings(&settings).await.unwrap();

        let reloaded = service.get_site_settings().await.unwrap();
        assert_eq!(reloaded, settings);
        assert!(reloaded.smtp_configured());

        service.set(keys::REGISTRATION_OPEN, "true").await.unwrap();
        assert!(service.get_site_settings().await.unwrap().registration_open);
    }

    #[tokio::test]
    async fn test_update_validation() {
        let service = setup().await;
        let settings = SiteSettings {
            site_name: "  ".into(),
            ..SiteSettings::default()
        };
        assert!(matches!(
            service.update_site_settings(&settings).await,
            Err(SettingsServiceError::InvalidValue(_))
        ));

        let settings = SiteSettings {
            smtp_from: "not-an-address".into(),
            ..SiteSettings::default()
        };
        assert!(service.update_site_settings(&settings).await.is_err());
    }
}
