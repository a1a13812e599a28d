//! Session repository
//!
//! Database operations for login sessions and the login audit log.

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{ClientInfo, LoginLog, Session};
use crate::with_pool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

macro_rules! session_from_row {
    ($row:expr) => {
        Session {
            id: $row.try_get("id")?,
            user_id: $row.try_get("user_id")?,
            csrf_token: $row.try_get("csrf_token")?,
            ip_address: $row.try_get("ip_address")?,
            user_agent: $row.try_get("user_agent")?,
            expires_at: $row.try_get("expires_at")?,
            created_at: $row.try_get("created_at")?,
        }
    };
}

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: &Session) -> Result<()>;

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete every session of a user, returning how many were removed
    async fn delete_by_user(&self, user_id: i64) -> Result<u64>;

    /// Delete every session of a user except `keep`
    async fn delete_by_user_except(&self, user_id: i64, keep: &str) -> Result<u64>;

    /// Delete sessions that expired before now
    async fn delete_expired(&self) -> Result<u64>;
}

/// SQLx-based session repository implementation
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(&self, session: &Session) -> Result<()> {
        with_pool!(self.pool, pool => {
            sqlx::query(
                r#"
                INSERT INTO sessions (id, user_id, csrf_token, ip_address, user_agent, expires_at, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&session.id)
            .bind(session.user_id)
            .bind(&session.csrf_token)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .bind(session.expires_at)
            .bind(session.created_at)
            .execute(pool)
            .await
            .context("Failed to create session")?;
        });
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let session = with_pool!(self.pool, pool => {
            let row = sqlx::query(
                "SELECT id, user_id, csrf_token, ip_address, user_agent, expires_at, created_at FROM sessions WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get session")?;
            match row {
                Some(row) => Some(session_from_row!(row)),
                None => None,
            }
        });
        Ok(session)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        with_pool!(self.pool, pool => {
            sqlx::query("DELETE FROM sessions WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await
                .context("Failed to delete session")?;
        });
        Ok(())
    }

    async fn delete_by_user(&self, user_id: i64) -> Result<u64> {
        let removed = with_pool!(self.pool, pool => {
            sqlx::query("DELETE FROM sessions WHERE user_id = ?")
                .bind(user_id)
                .execute(pool)
                .await
                .context("Failed to delete user sessions")?
                .rows_affected()
        });
        Ok(removed)
    }

    async fn delete_by_user_except(&self, user_id: i64, keep: &str) -> Result<u64> {
        let removed = with_pool!(self.pool, pool => {
            sqlx::query("DELETE FROM sessions WHERE user_id = ? AND id <> ?")
                .bind(user_id)
                .bind(keep)
                .execute(pool)
                .await
                .context("Failed to delete other sessions")?
                .rows_affected()
        });
        Ok(removed)
    }

    async fn delete_expired(&self) -> Result<u64> {
        let removed = with_pool!(self.pool, pool => {
            sqlx::query("DELETE FROM sessions WHERE expires_at < ?")
                .bind(Utc::now())
                .execute(pool)
                .await
                .context("Failed to delete expired sessions")?
                .rows_affected()
        });
        Ok(removed)
    }
}

/// Login audit log
#[async_trait]
pub trait LoginLogRepository: Send + Sync {
    async fn record(
        &self,
        user_id: Option<i64>,
        username: &str,
        client: &ClientInfo,
        success: bool,
        failure_reason: Option<&str>,
    ) -> Result<i64>;

    /// Most recent attempts first
    async fn recent(&self, limit: i64) -> Result<Vec<LoginLog>>;

    /// Failed attempts since `since`
    async fn count_failures_since(&self, since: DateTime<Utc>) -> Result<i64>;
}

pub struct SqlxLoginLogRepository {
    pool: DynDatabasePool,
}

impl SqlxLoginLogRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn LoginLogRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl LoginLogRepository for SqlxLoginLogRepository {
    async fn record(
        &self,
        user_id: Option<i64>,
        username: &str,
        client: &ClientInfo,
        success: bool,
        failure_reason: Option<&str>,
    ) -> Result<i64> {
        let id = with_pool!(self.pool, pool => {
            sqlx::query(
                r#"
                INSERT INTO login_logs (user_id, username, ip_address, user_agent, success, failure_reason, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(user_id)
            .bind(username)
            .bind(&client.ip_address)
            .bind(&client.user_agent)
            .bind(success)
            .bind(failure_reason)
            .bind(Utc::now())
            .execute(pool)
            .await
            .context("Failed to record login attempt")?
            .insert_id()
        });
        Ok(id)
    }

    async fn recent(&self, limit: i64) -> Result<Vec<LoginLog>> {
        let logs = with_pool!(self.pool, pool => {
            let rows = sqlx::query(
                r#"
                SELECT id, user_id, username, ip_address, user_agent, success, failure_reason, created_at
                FROM login_logs
                ORDER BY created_at DESC, id DESC
                LIMIT ?
                "#,
            )
            .bind(limit)
            .fetch_all(pool)
            .await
            .context("Failed to list login logs")?;

            let mut logs = Vec::with_capacity(rows.len());
            for row in rows {
                logs.push(LoginLog {
                    id: row.try_get("id")?,
                    user_id: row.try_get("user_id")?,
                    username: row.try_get("username")?,
                    ip_address: row.try_get("ip_address")?,
                    user_agent: row.try_get("user_agent")?,
                    success: row.try_get("success")?,
                    failure_reason: row.try_get("failure_reason")?,
                    created_at: row.try_get("created_at")?,
                });
            }
            logs
        });
        Ok(logs)
    }

    async fn count_failures_since(&self, since: DateTime<Utc>) -> Result<i64> {
        let count = with_pool!(self.pool, pool => {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM login_logs WHERE success = ? AND created_at >= ?",
            )
            .bind(false)
            .bind(since)
            .fetch_one(pool)
            .await
            .context("Failed to count failed logins")?
        });
        Ok(count)
    }
}
