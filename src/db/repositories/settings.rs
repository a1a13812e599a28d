//! Settings repository
//!
//! Key/value site settings stored in the `settings` table.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::with_pool;

/// A setting key-value pair
#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

/// Repository trait for settings operations
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    /// Get a single setting by key
    async fn get(&self, key: &str) -> Result<Option<Setting>>;

    /// Get all settings ordered by key
    async fn get_all(&self) -> Result<Vec<Setting>>;

    /// Get all settings as a map
    async fn get_map(&self) -> Result<HashMap<String, String>>;

    /// Insert or replace a setting
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Write several settings in one transaction
    async fn set_many(&self, settings: &HashMap<String, String>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// SQLx-based settings repository
pub struct SqlxSettingsRepository {
    pool: DynDatabasePool,
}

impl SqlxSettingsRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SettingsRepository> {
        Arc::new(Self::new(pool))
    }

    fn upsert_sql(&self) -> &'static str {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                "INSERT INTO settings (setting_key, setting_value) VALUES (?, ?) \
                 ON CONFLICT (setting_key) DO UPDATE SET setting_value = excluded.setting_value"
            }
            DatabaseDriver::Mysql => {
                "INSERT INTO settings (setting_key, setting_value) VALUES (?, ?) \
                 ON DUPLICATE KEY UPDATE setting_value = VALUES(setting_value)"
            }
        }
    }
}

#[async_trait]
impl SettingsRepository for SqlxSettingsRepository {
    async fn get(&self, key: &str) -> Result<Option<Setting>> {
        let setting = with_pool!(self.pool, pool => {
            let row = sqlx::query("SELECT setting_key, setting_value FROM settings WHERE setting_key = ?")
                .bind(key)
                .fetch_optional(pool)
                .await
                .context("Failed to get setting")?;
            match row {
                Some(row) => Some(Setting {
                    key: row.try_get("setting_key")?,
                    value: row.try_get("setting_value")?,
                }),
                None => None,
            }
        });
        Ok(setting)
    }

    async fn get_all(&self) -> Result<Vec<Setting>> {
        let settings = with_pool!(self.pool, pool => {
            let rows = sqlx::query("SELECT setting_key, setting_value FROM settings ORDER BY setting_key")
                .fetch_all(pool)
                .await
                .context("Failed to list settings")?;
            let mut settings = Vec::with_capacity(rows.len());
            for row in rows {
                settings.push(Setting {
                    key: row.try_get("setting_key")?,
                    value: row.try_get("setting_value")?,
                });
            }
            settings
        });
        Ok(settings)
    }

    async fn get_map(&self) -> Result<HashMap<String, String>> {
        Ok(self
            .get_all()
            .await?
            .into_iter()
            .map(|s| (s.key, s.value))
            .collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let sql = self.upsert_sql();
        with_pool!(self.pool, pool => {
            sqlx::query(sql)
                .bind(key)
                .bind(value)
                .execute(pool)
                .await
                .with_context(|| format!("Failed to save setting {}", key))?;
        });
        Ok(())
    }

    async fn set_many(&self, settings: &HashMap<String, String>) -> Result<()> {
        let sql = self.upsert_sql();
        with_pool!(self.pool, pool => {
            let mut tx = pool.begin().await.context("Failed to begin transaction")?;
            for (key, value) in settings {
                sqlx::query(sql)
                    .bind(key)
                    .bind(value)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to save setting {}", key))?;
            }
            tx.commit().await.context("Failed to commit settings")?;
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        with_pool!(self.pool, pool => {
            sqlx::query("DELETE FROM settings WHERE setting_key = ?")
                .bind(key)
                .execute(pool)
                .await
                .context("Failed to delete setting")?;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup() -> SqlxSettingsRepository {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        SqlxSettingsRepository::new(pool)
    }

    #[tokio::test]
    async fn test_seeded_defaults() {
        let repo = setup().await;
        let map = repo.get_map().await.unwrap();
        assert_eq!(map.get("registration_open").map(String::as_str), Some("true"));
        assert_eq!(map.get("comment_moderation").map(String::as_str), Some("false"));
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let repo = setup().await;
        repo.set("comment_moderation", "true").await.unwrap();
        assert_eq!(repo.get("comment_moderation").await.unwrap().unwrap().value, "true");

        let mut many = HashMap::new();
        many.insert("site_description".to_string(), "Hope".to_string());
        many.insert("custom".to_string(), "1".to_string());
        repo.set_many(&many).await.unwrap();
        assert_eq!(repo.get("site_description").await.unwrap().unwrap().value, "Hope");

        repo.delete("custom").await.unwrap();
        assert!(repo.get("custom").await.unwrap().is_none());
    }
}
