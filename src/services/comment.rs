//! Comment service
//!
//! Comments belong to published stories. Replies nest one level per parent
//! and a reply must target a comment of the same story.

use anyhow::Context;
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::repositories::{CommentRepository, StoryRepository, UserRepository};
use crate::models::{
    Comment, CommentStatus, CommentWithAuthor, CreateCommentInput, ListParams, NewComment,
    NewNotification, NotificationKind, PagedResult, Permission, Story, User,
};
use crate::services::notification::NotificationService;
use crate::services::rate_limiter::{RateAction, RateLimited, RateLimiter};
use crate::services::settings::SettingsService;

const MAX_COMMENT_LENGTH: usize = 5000;

#[derive(Debug, thiserror::Error)]
pub enum CommentServiceError {
    #[error("Comment not found")]
    NotFound,

    #[error("Story not found")]
    StoryNotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct CommentService {
    comments: Arc<dyn CommentRepository>,
    stories: Arc<dyn StoryRepository>,
    users: Arc<dyn UserRepository>,
    settings: Arc<SettingsService>,
    notifications: Arc<NotificationService>,
    rate_limiter: Arc<RateLimiter>,
}

impl CommentService {
    pub fn new(
        comments: Arc<dyn CommentRepository>,
        stories: Arc<dyn StoryRepository>,
        users: Arc<dyn UserRepository>,
        settings: Arc<SettingsService>,
        notifications: Arc<NotificationService>,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            comments,
            stories,
            users,
            settings,
            notifications,
            rate_limiter,
        }
    }

    /// Post a comment on a published story.
    ///
    /// Staff and verified members are approved right away. Other comments
    /// wait for a moderator while comment moderation is switched on.
    pub async fn create(
        &self,
        author: &User,
        story_id: i64,
        input: CreateCommentInput,
    ) -> Result<Comment, CommentServiceError> {
        if !author.is_active() {
            return Err(CommentServiceError::Forbidden("Banned users cannot comment".into()));
        }
        let content = input.content.trim();
        if content.is_empty() {
            return Err(CommentServiceError::ValidationError("Comment cannot be empty".into()));
        }
        if content.chars().count() > MAX_COMMENT_LENGTH {
            return Err(CommentServiceError::ValidationError(format!(
                "Comment cannot exceed {} characters",
                MAX_COMMENT_LENGTH
            )));
        }

        let story = self
            .stories
            .get_by_id(story_id)
            .await
            .context("Failed to load story")?
            .filter(|s| s.is_published())
            .ok_or(CommentServiceError::StoryNotFound)?;
        if !story.is_author(author) && !story.access_level.permits(Some(author)) {
            return Err(CommentServiceError::Forbidden(
                "You cannot comment on this story".into(),
            ));
        }

        let parent = match input.parent_id {
            Some(parent_id) => {
                let parent = self
                    .comments
                    .get_by_id(parent_id)
                    .await
                    .context("Failed to load parent comment")?
                    .ok_or_else(|| CommentServiceError::ValidationError("Parent comment not found".into()))?;
                if parent.story_id != story_id {
                    return Err(CommentServiceError::ValidationError(
                        "Parent comment belongs to another story".into(),
                    ));
                }
                Some(parent)
            }
            None => None,
        };

        self.rate_limiter
            .hit(RateAction::Comment, &author.id.to_string())
            .await?;

        let status = if author.is_staff() || author.is_verified || !self.moderation_enabled().await {
            CommentStatus::Approved
        } else {
            CommentStatus::Pending
        };

        let comment = self
            .comments
            .create(&NewComment {
                story_id,
                user_id: author.id,
                // Threads are one level deep: a reply to a reply joins the thread root
                parent_id: parent.as_ref().map(|p| p.parent_id.unwrap_or(p.id)),
                content: content.to_string(),
                status,
            })
            .await
            .context("Failed to create comment")?;
        tracing::info!("User {} commented on story {} ({})", author.username, story_id, status);

        if status == CommentStatus::Approved {
            self.notify_participants(author.id, author.public_name(), &story, parent.as_ref())
                .await;
        }
        Ok(comment)
    }

    /// Comments of a story as a tree, replies under their parent.
    ///
    /// Moderators also see pending comments.
    pub async fn list_for_story(
        &self,
        story_id: i64,
        viewer: Option<&User>,
    ) -> Result<Vec<CommentWithAuthor>, CommentServiceError> {
        let include_pending = viewer.is_some_and(|v| v.has_permission(Permission::ModerateComments));
        let flat = self
            .comments
            .list_for_story(story_id, include_pending)
            .await
            .context("Failed to list comments")?;
        Ok(build_tree(flat))
    }

    /// Comments waiting for review, oldest first
    pub async fn pending(
        &self,
        moderator: &User,
        params: &ListParams,
    ) -> Result<PagedResult<CommentWithAuthor>, CommentServiceError> {
        require_moderator(moderator)?;
        let (items, total) = self
            .comments
            .list_by_status(CommentStatus::Pending, params)
            .await
            .context("Failed to list pending comments")?;
        Ok(PagedResult::new(items, total, params))
    }

    pub async fn approve(&self, moderator: &User, id: i64) -> Result<(), CommentServiceError> {
        require_moderator(moderator)?;
        let comment = self.get(id).await?;
        if comment.status == CommentStatus::Approved {
            return Ok(());
        }
        self.comments
            .update_status(id, CommentStatus::Approved)
            .await
            .context("Failed to approve comment")?;

        let name = self
            .users
            .get_by_id(comment.user_id)
            .await
            .context("Failed to load comment author")?
            .map(|user| user.public_name().to_string())
            .unwrap_or_else(|| "Someone".to_string());
        if let Some(story) = self
            .stories
            .get_by_id(comment.story_id)
            .await
            .context("Failed to load story")?
        {
            let parent = match comment.parent_id {
                Some(parent_id) => self
                    .comments
                    .get_by_id(parent_id)
                    .await
                    .context("Failed to load parent comment")?,
                None => None,
            };
            self.notify_participants(comment.user_id, &name, &story, parent.as_ref())
                .await;
        }
        Ok(())
    }

    pub async fn reject(&self, moderator: &User, id: i64) -> Result<(), CommentServiceError> {
        require_moderator(moderator)?;
        self.get(id).await?;
        self.comments
            .update_status(id, CommentStatus::Rejected)
            .await
            .context("Failed to reject comment")?;
        Ok(())
    }

    /// Delete a comment with its replies. Authors may delete their own.
    pub async fn delete(&self, actor: &User, id: i64) -> Result<(), CommentServiceError> {
        let comment = self.get(id).await?;
        if comment.user_id != actor.id && !actor.has_permission(Permission::ModerateComments) {
            return Err(CommentServiceError::Forbidden("You cannot delete this comment".into()));
        }
        self.comments.delete(id).await.context("Failed to delete comment")?;
        tracing::info!("User {} deleted comment {}", actor.username, id);
        Ok(())
    }

    async fn get(&self, id: i64) -> Result<Comment, CommentServiceError> {
        self.comments
            .get_by_id(id)
            .await
            .context("Failed to load comment")?
            .ok_or(CommentServiceError::NotFound)
    }

    async fn moderation_enabled(&self) -> bool {
        match self.settings.get_site_settings().await {
            Ok(settings) => settings.comment_moderation,
            Err(e) => {
                tracing::warn!("Failed to read comment moderation setting: {}", e);
                true
            }
        }
    }

    /// Tell the story author and the parent's author, never the commenter
    async fn notify_participants(&self, commenter_id: i64, name: &str, story: &Story, parent: Option<&Comment>) {
        let link = format!("{}#comments", story.path());

        if story.author_id != commenter_id {
            let notification = NewNotification::new(
                story.author_id,
                NotificationKind::StoryCommented,
                "New comment on your story",
                format!("{} commented on your story.", name),
            )
            .with_link(link.clone());
            if let Err(e) = self.notifications.notify(notification).await {
                tracing::warn!("Failed to notify story author: {}", e);
            }
        }

        if let Some(parent) = parent {
            if parent.user_id != commenter_id && parent.user_id != story.author_id {
                let notification = NewNotification::new(
                    parent.user_id,
                    NotificationKind::CommentReplied,
                    "New reply to your comment",
                    format!("{} replied to your comment.", name),
                )
                .with_link(link);
                if let Err(e) = self.notifications.notify(notification).await {
                    tracing::warn!("Failed to notify parent comment author: {}", e);
                }
            }
        }
    }
}

fn require_moderator(user: &User) -> Result<(), CommentServiceError> {
    if user.has_permission(Permission::ModerateComments) {
        Ok(())
    } else {
        Err(CommentServiceError::Forbidden("Moderator permission required".into()))
    }
}

/// Nest replies under their parents, keeping posting order.
///
/// Replies whose parent is not in `flat` (hidden or removed) are dropped.
pub fn build_tree(flat: Vec<CommentWithAuthor>) -> Vec<CommentWithAuthor> {
    let parents: HashMap<i64, Option<i64>> = flat
        .iter()
        .map(|c| (c.comment.id, c.comment.parent_id))
        .collect();
    // Walks up at most `parents.len()` steps, so cycles end as orphans
    let thread_root = |mut id: i64| -> Option<i64> {
        for _ in 0..parents.len() {
            match parents.get(&id)? {
                Some(parent_id) => id = *parent_id,
                None => return Some(id),
            }
        }
        None
    };

    let mut replies: HashMap<i64, Vec<CommentWithAuthor>> = HashMap::new();
    let mut roots = Vec::new();
    for comment in flat {
        match comment.comment.parent_id {
            None => roots.push(comment),
            Some(parent_id) => {
                if let Some(root_id) = thread_root(parent_id) {
                    replies.entry(root_id).or_default().push(comment);
                }
            }
        }
    }
    for root in &mut roots {
        root.replies = replies.remove(&root.comment.id).unwrap_or_default();
    }
    roots
}
