//! Notification repository

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{ListParams, NewNotification, Notification, NotificationKind};
use crate::with_pool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

macro_rules! notification_from_row {
    ($row:expr) => {
        Notification {
            id: $row.try_get("id")?,
            user_id: $row.try_get("user_id")?,
            kind: NotificationKind::from_str(&$row.try_get::<String, _>("kind")?)?,
            title: $row.try_get("title")?,
            message: $row.try_get("message")?,
            link: $row.try_get("link")?,
            is_read: $row.try_get("is_read")?,
            read_at: $row.try_get("read_at")?,
            created_at: $row.try_get("created_at")?,
        }
    };
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: &NewNotification) -> Result<Notification>;

    /// Notifications of a user, newest first
    async fn list(
        &self,
        user_id: i64,
        unread_only: bool,
        params: &ListParams,
    ) -> Result<(Vec<Notification>, i64)>;

    async fn unread_count(&self, user_id: i64) -> Result<i64>;

    /// Mark one notification read; false when it is not the user's
    async fn mark_read(&self, id: i64, user_id: i64) -> Result<bool>;

    async fn mark_all_read(&self, user_id: i64) -> Result<u64>;

    /// Delete read notifications created before `cutoff`
    async fn delete_read_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

pub struct SqlxNotificationRepository {
    pool: DynDatabasePool,
}

impl SqlxNotificationRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn NotificationRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl NotificationRepository for SqlxNotificationRepository {
    async fn create(&self, notification: &NewNotification) -> Result<Notification> {
        let now = Utc::now();
        let id = with_pool!(self.pool, pool => {
            sqlx::query(
                r#"
                INSERT INTO notifications (user_id, kind, title, message, link, is_read, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(notification.user_id)
            .bind(notification.kind.as_str())
            .bind(&notification.title)
            .bind(&notification.message)
            .bind(&notification.link)
            .bind(false)
            .bind(now)
            .execute(pool)
            .await
            .context("Failed to create notification")?
            .insert_id()
        });
        Ok(Notification {
            id,
            user_id: notification.user_id,
            kind: notification.kind,
            title: notification.title.clone(),
            message: notification.message.clone(),
            link: notification.link.clone(),
            is_read: false,
            read_at: None,
            created_at: now,
        })
    }

    async fn list(
        &self,
        user_id: i64,
        unread_only: bool,
        params: &ListParams,
    ) -> Result<(Vec<Notification>, i64)> {
        let unread_only = i64::from(unread_only);
        let result = with_pool!(self.pool, pool => {
            let rows = sqlx::query(
                r#"
                SELECT id, user_id, kind, title, message, link, is_read, read_at, created_at
                FROM notifications
                WHERE user_id = ? AND (? = 0 OR is_read = 0)
                ORDER BY created_at DESC, id DESC
                LIMIT ? OFFSET ?
                "#,
            )
            .bind(user_id)
            .bind(unread_only)
            .bind(params.limit())
            .bind(params.offset())
            .fetch_all(pool)
            .await
            .context("Failed to list notifications")?;

            let total = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND (? = 0 OR is_read = 0)",
            )
            .bind(user_id)
            .bind(unread_only)
            .fetch_one(pool)
            .await
            .context("Failed to count notifications")?;

            let mut notifications = Vec::with_capacity(rows.len());
            for row in rows {
                notifications.push(notification_from_row!(row));
            }
            (notifications, total)
        });
        Ok(result)
    }

    async fn unread_count(&self, user_id: i64) -> Result<i64> {
        let count = with_pool!(self.pool, pool => {
            sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ? AND is_read = 0",
            )
            .bind(user_id)
            .fetch_one(pool)
            .await
            .context("Failed to count unread notifications")?
        });
        Ok(count)
    }

    async fn mark_read(&self, id: i64, user_id: i64) -> Result<bool> {
        let updated = with_pool!(self.pool, pool => {
            sqlx::query(
                "UPDATE notifications SET is_read = ?, read_at = COALESCE(read_at, ?) WHERE id = ? AND user_id = ?",
            )
            .bind(true)
            .bind(Utc::now())
            .bind(id)
            .bind(user_id)
            .execute(pool)
            .await
            .context("Failed to mark notification read")?
            .rows_affected()
        });
        Ok(updated > 0)
    }

    async fn mark_all_read(&self, user_id: i64) -> Result<u64> {
        let updated = with_pool!(self.pool, pool => {
            sqlx::query(
                "UPDATE notifications SET is_read = ?, read_at = ? WHERE user_id = ? AND is_read = 0",
            )
            .bind(true)
            .bind(Utc::now())
            .bind(user_id)
            .execute(pool)
            .await
            .context("Failed to mark notifications read")?
            .rows_affected()
        });
        Ok(updated)
    }

    async fn delete_read_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let removed = with_pool!(self.pool, pool => {
            sqlx::query("DELETE FROM notifications WHERE is_read = 1 AND created_at < ?")
                .bind(cutoff)
                .execute(pool)
                .await
                .context("Failed to prune notifications")?
                .rows_affected()
        });
        Ok(removed)
    }
}
