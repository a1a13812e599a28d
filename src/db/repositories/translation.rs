//! Interface translation repository
//!
//! Rows of the `translations` table, one per `(msg_key, language)`.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Translation;
use crate::with_pool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

#[async_trait]
pub trait TranslationRepository: Send + Sync {
    async fn get(&self, key: &str, language: &str) -> Result<Option<String>>;

    /// Every string stored for a language, ordered by key
    async fn list_by_language(&self, language: &str) -> Result<Vec<Translation>>;

    async fn upsert(&self, key: &str, language: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str, language: &str) -> Result<bool>;

    /// Distinct message keys across all languages
    async fn keys(&self) -> Result<Vec<String>>;

    /// Number of stored strings per language
    async fn count_by_language(&self) -> Result<Vec<(String, i64)>>;
}

pub struct SqlxTranslationRepository {
    pool: DynDatabasePool,
}

impl SqlxTranslationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn TranslationRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl TranslationRepository for SqlxTranslationRepository {
    async fn get(&self, key: &str, language: &str) -> Result<Option<String>> {
        let value = with_pool!(self.pool, pool => {
            sqlx::query_scalar::<_, String>(
                "SELECT value FROM translations WHERE msg_key = ? AND language = ?",
            )
            .bind(key)
            .bind(language)
            .fetch_optional(pool)
            .await
            .context("Failed to get translation")?
        });
        Ok(value)
    }

    async fn list_by_language(&self, language: &str) -> Result<Vec<Translation>> {
        let translations = with_pool!(self.pool, pool => {
            let rows = sqlx::query(
                "SELECT id, msg_key, language, value, updated_at FROM translations WHERE language = ? ORDER BY msg_key",
            )
            .bind(language)
            .fetch_all(pool)
            .await
            .context("Failed to list translations")?;
            let mut translations = Vec::with_capacity(rows.len());
            for row in rows {
                translations.push(Translation {
                    id: row.try_get("id")?,
                    key: row.try_get("msg_key")?,
                    language: row.try_get("language")?,
                    value: row.try_get("value")?,
                    updated_at: row.try_get("updated_at")?,
                });
            }
            translations
        });
        Ok(translations)
    }

    async fn upsert(&self, key: &str, language: &str, value: &str) -> Result<()> {
        let sql = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                "INSERT INTO translations (msg_key, language, value, updated_at) VALUES (?, ?, ?, ?) \
                 ON CONFLICT (msg_key, language) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"
            }
            DatabaseDriver::Mysql => {
                "INSERT INTO translations (msg_key, language, value, updated_at) VALUES (?, ?, ?, ?) \
                 ON DUPLICATE KEY UPDATE value = VALUES(value), updated_at = VALUES(updated_at)"
            }
        };
        with_pool!(self.pool, pool => {
            sqlx::query(sql)
                .bind(key)
                .bind(language)
                .bind(value)
                .bind(Utc::now())
                .execute(pool)
                .await
                .context("Failed to save translation")?;
        });
        Ok(())
    }

    async fn delete(&self, key: &str, language: &str) -> Result<bool> {
        let removed = with_pool!(self.pool, pool => {
            sqlx::query("DELETE FROM translations WHERE msg_key = ? AND language = ?")
                .bind(key)
                .bind(language)
                .execute(pool)
                .await
                .context("Failed to delete translation")?
                .rows_affected()
        });
        Ok(removed > 0)
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let keys = with_pool!(self.pool, pool => {
            sqlx::query_scalar::<_, String>("SELECT DISTINCT msg_key FROM translations ORDER BY msg_key")
                .fetch_all(pool)
                .await
                .context("Failed to list translation keys")?
        });
        Ok(keys)
    }

    async fn count_by_language(&self) -> Result<Vec<(String, i64)>> {
        let counts = with_pool!(self.pool, pool => {
            let rows = sqlx::query(
                "SELECT language, COUNT(*) AS total FROM translations GROUP BY language ORDER BY language",
            )
            .fetch_all(pool)
            .await
            .context("Failed to count translations")?;
            let mut counts = Vec::with_capacity(rows.len());
            for row in rows {
                counts.push((row.try_get("language")?, row.try_get("total")?));
            }
            counts
        });
        Ok(counts)
    }
}
