//! Notification service
//!
//! In-app notifications, with an optional e-mail copy when SMTP is set up.
//! E-mail delivery runs in the background and never fails the caller.

use anyhow::Context;
use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::db::repositories::{NotificationRepository, UserRepository};
use crate::models::{ListParams, NewNotification, Notification, PagedResult};
use crate::services::email::{Email, EmailService};

#[derive(Debug, Error)]
pub enum NotificationServiceError {
    #[error("Notification not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct NotificationService {
    repo: Arc<dyn NotificationRepository>,
    users: Arc<dyn UserRepository>,
    email: Option<Arc<EmailService>>,
    /// Absolute site URL prefixed to links in e-mails
    base_url: String,
}

impl NotificationService {
    pub fn new(repo: Arc<dyn NotificationRepository>, users: Arc<dyn UserRepository>) -> Self {
        Self {
            repo,
            users,
            email: None,
            base_url: String::new(),
        }
    }

    /// Also send each notification by e-mail when SMTP is configured
    pub fn with_email(mut self, email: Arc<EmailService>, base_url: &str) -> Self {
        self.email = Some(email);
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Store a notification for one user
    pub async fn notify(&self, notification: NewNotification) -> Result<Notification, NotificationServiceError> {
        let created = self
            .repo
            .create(&notification)
            .await
            .context("Failed to create notification")?;
        tracing::debug!(
            "Notification {} ({}) for user {}",
            created.id,
            created.kind,
            created.user_id
        );
        self.send_email_copy(&created).await;
        Ok(created)
    }

    /// Notify every active moderator, skipping `except` (usually the actor)
    pub async fn notify_staff(
        &self,
        notification: NewNotification,
        except: Option<i64>,
    ) -> Result<usize, NotificationServiceError> {
        let staff = self.users.staff_ids().await.context("Failed to list staff")?;
        let mut sent = 0;
        for user_id in staff.into_iter().filter(|id| Some(*id) != except) {
            self.notify(NewNotification {
                user_id,
                ..notification.clone()
            })
            .await?;
            sent += 1;
        }
        Ok(sent)
    }

    pub async fn list(
        &self,
        user_id: i64,
        unread_only: bool,
        params: &ListParams,
    ) -> Result<PagedResult<Notification>, NotificationServiceError> {
        let (items, total) = self
            .repo
            .list(user_id, unread_only, params)
            .await
            .context("Failed to list notifications")?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn unread_count(&self, user_id: i64) -> Result<i64, NotificationServiceError> {
        Ok(self
            .repo
            .unread_count(user_id)
            .await
            .context("Failed to count notifications")?)
    }

    /// Mark one of the user's notifications read
    pub async fn mark_read(&self, id: i64, user_id: i64) -> Result<(), NotificationServiceError> {
        let updated = self
            .repo
            .mark_read(id, user_id)
            .await
            .context("Failed to mark notification read")?;
        if !updated {
            return Err(NotificationServiceError::NotFound);
        }
        Ok(())
    }

    pub async fn mark_all_read(&self, user_id: i64) -> Result<u64, NotificationServiceError> {
        Ok(self
            .repo
            .mark_all_read(user_id)
            .await
            .context("Failed to mark notifications read")?)
    }

    /// Delete read notifications older than `days`
    pub async fn prune_older_than(&self, days: i64) -> Result<u64, NotificationServiceError> {
        let cutoff = Utc::now() - Duration::days(days.max(0));
        let removed = self
            .repo
            .delete_read_before(cutoff)
            .await
            .context("Failed to prune notifications")?;
        if removed > 0 {
            tracing::info!("Pruned {} read notifications", removed);
        }
        Ok(removed)
    }

    async fn send_email_copy(&self, notification: &Notification) {
        let Some(email) = self.email.clone() else {
            return;
        };
        if !email.is_enabled().await {
            return;
        }
        let user = match self.users.get_by_id(notification.user_id).await {
            Ok(Some(user)) if user.is_active() => user,
            Ok(_) => return,
            Err(e) => {
                tracing::warn!("Failed to load notification recipient: {}", e);
                return;
            }
        };

        let mut body = notification.message.clone();
        if let Some(link) = &notification.link {
            body.push_str(&format!("\n\n{}{}", self.base_url, link));
        }
        let message = Email {
            to: user.email,
            subject: notification.title.clone(),
            body,
        };
        tokio::spawn(async move {
            if let Err(e) = email.send(&message).await {
                tracing::warn!("Failed to e-mail notification: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxNotificationRepository, SqlxUserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{CreateUserInput, NotificationKind, UserRole};

    async fn setup() -> (NotificationService, Vec<i64>) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let users = SqlxUserRepository::boxed(pool.clone());
        let mut ids = Vec::new();
        for (name, role) in [
            ("admin", UserRole::Admin),
            ("mod", UserRole::Moderator),
            ("member", UserRole::Member),
        ] {
            let user = users
                .create(&CreateUserInput {
                    username: name.into(),
                    email: format!("{}@example.com", name),
                    password_hash: "h".into(),
                    role,
                    preferred_language: None,
                })
                .await
                .unwrap();
            ids.push(user.id);
        }
        let service = NotificationService::new(SqlxNotificationRepository::boxed(pool), users);
        (service, ids)
    }

    #[tokio::test]
    async fn test_notify_staff_skips_actor_and_members() {
        let (service, ids) = setup().await;
        let sent = service
            .notify_staff(
                NewNotification::new(0, NotificationKind::StorySubmitted, "New story", "Please review"),
                Some(ids[0]),
            )
            .await
            .unwrap();
        assert_eq!(sent, 1);
        assert_eq!(service.unread_count(ids[1]).await.unwrap(), 1);
        assert_eq!(service.unread_count(ids[0]).await.unwrap(), 0);
        assert_eq!(service.unread_count(ids[2]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_read_checks_owner() {
        let (service, ids) = setup().await;
        let n = service
            .notify(NewNotification::new(ids[2], NotificationKind::System, "Hello", "Welcome"))
            .await
            .unwrap();

        assert!(matches!(
            service.mark_read(n.id, ids[1]).await,
            Err(NotificationServiceError::NotFound)
        ));
        service.mark_read(n.id, ids[2]).await.unwrap();
        assert_eq!(service.unread_count(ids[2]).await.unwrap(), 0);

        let page = service.list(ids[2], false, &ListParams::default()).await.unwrap();
        assert_eq!(page.total, 1);
        assert!(page.items[0].is_read);
        assert_eq!(service.list(ids[2], true, &ListParams::default()).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_mark_all_and_prune() {
        let (service, ids) = setup().await;
        for i in 0..3 {
            service
                .notify(NewNotification::new(ids[2], NotificationKind::System, format!("n{}", i), "m"))
                .await
                .unwrap();
        }
        assert_eq!(service.mark_all_read(ids[2]).await.unwrap(), 3);
        assert_eq!(service.prune_older_than(30).await.unwrap(), 0);
        assert_eq!(service.prune_older_than(0).await.unwrap(), 3);
    }
}
