//! Comment repository

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{gravatar_url, Comment, CommentStatus, CommentWithAuthor, ListParams, NewComment};
use crate::with_pool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

const AUTHORED_SELECT: &str = r#"
    SELECT c.id, c.story_id, c.user_id, c.parent_id, c.content, c.status, c.created_at, c.updated_at,
           COALESCE(NULLIF(TRIM(u.display_name), ''), u.username) AS author_name,
           u.email AS author_email,
           s.author_id AS story_author_id
    FROM comments c
    JOIN users u ON u.id = c.user_id
    JOIN stories s ON s.id = c.story_id
"#;

macro_rules! comment_from_row {
    ($row:expr) => {
        Comment {
            id: $row.try_get("id")?,
            story_id: $row.try_get("story_id")?,
            user_id: $row.try_get("user_id")?,
            parent_id: $row.try_get("parent_id")?,
            content: $row.try_get("content")?,
            status: CommentStatus::from_str(&$row.try_get::<String, _>("status")?)?,
            created_at: $row.try_get("created_at")?,
            updated_at: $row.try_get("updated_at")?,
        }
    };
}

macro_rules! authored_from_row {
    ($row:expr) => {{
        let comment = comment_from_row!($row);
        let story_author_id: i64 = $row.try_get("story_author_id")?;
        CommentWithAuthor {
            author_name: $row.try_get("author_name")?,
            avatar_url: gravatar_url(&$row.try_get::<String, _>("author_email")?),
            is_story_author: story_author_id == comment.user_id,
            replies: Vec::new(),
            comment,
        }
    }};
}

/// Comment repository trait
#[async_trait]
pub trait CommentRepository: Send + Sync {
    async fn create(&self, comment: &NewComment) -> Result<Comment>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Comment>>;

    /// Comments of a story in posting order, replies not nested.
    ///
    /// Pending comments are included only when `include_pending` is set.
    async fn list_for_story(
        &self,
        story_id: i64,
        include_pending: bool,
    ) -> Result<Vec<CommentWithAuthor>>;

    /// Comments with `status`, oldest first, for moderation
    async fn list_by_status(
        &self,
        status: CommentStatus,
        params: &ListParams,
    ) -> Result<(Vec<CommentWithAuthor>, i64)>;

    async fn update_status(&self, id: i64, status: CommentStatus) -> Result<bool>;

    /// Delete a comment and its replies
    async fn delete(&self, id: i64) -> Result<bool>;
}

/// SQLx-based comment repository implementation
pub struct SqlxCommentRepository {
    pool: DynDatabasePool,
}

impl SqlxCommentRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CommentRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl CommentRepository for SqlxCommentRepository {
    async fn create(&self, comment: &NewComment) -> Result<Comment> {
        let now = Utc::now();
        let id = with_pool!(self.pool, pool => {
            sqlx::query(
                r#"
                INSERT INTO comments (story_id, user_id, parent_id, content, status, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(comment.story_id)
            .bind(comment.user_id)
            .bind(comment.parent_id)
            .bind(&comment.content)
            .bind(comment.status.as_str())
            .bind(now)
            .bind(now)
            .execute(pool)
            .await
            .context("Failed to create comment")?
            .insert_id()
        });

        Ok(Comment {
            id,
            story_id: comment.story_id,
            user_id: comment.user_id,
            parent_id: comment.parent_id,
            content: comment.content.clone(),
            status: comment.status,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Comment>> {
        let comment = with_pool!(self.pool, pool => {
            let row = sqlx::query(
                "SELECT id, story_id, user_id, parent_id, content, status, created_at, updated_at FROM comments WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get comment")?;
            match row {
                Some(row) => Some(comment_from_row!(row)),
                None => None,
            }
        });
        Ok(comment)
    }

    async fn list_for_story(
        &self,
        story_id: i64,
        include_pending: bool,
    ) -> Result<Vec<CommentWithAuthor>> {
        let sql = format!(
            "{} WHERE c.story_id = ? AND (c.status = 'approved' OR (? = 1 AND c.status = 'pending')) ORDER BY c.created_at, c.id",
            AUTHORED_SELECT
        );
        let comments = with_pool!(self.pool, pool => {
            let rows = sqlx::query(&sql)
                .bind(story_id)
                .bind(i64::from(include_pending))
                .fetch_all(pool)
                .await
                .context("Failed to list story comments")?;
            let mut comments = Vec::with_capacity(rows.len());
            for row in rows {
                comments.push(authored_from_row!(row));
            }
            comments
        });
        Ok(comments)
    }

    async fn list_by_status(
        &self,
        status: CommentStatus,
        params: &ListParams,
    ) -> Result<(Vec<CommentWithAuthor>, i64)> {
        let sql = format!(
            "{} WHERE c.status = ? ORDER BY c.created_at, c.id LIMIT ? OFFSET ?",
            AUTHORED_SELECT
        );
        let result = with_pool!(self.pool, pool => {
            let rows = sqlx::query(&sql)
                .bind(status.as_str())
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(pool)
                .await
                .context("Failed to list comments by status")?;
            let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM comments WHERE status = ?")
                .bind(status.as_str())
                .fetch_one(pool)
                .await
                .context("Failed to count comments")?;
            let mut comments = Vec::with_capacity(rows.len());
            for row in rows {
                comments.push(authored_from_row!(row));
            }
            (comments, total)
        });
        Ok(result)
    }

    async fn update_status(&self, id: i64, status: CommentStatus) -> Result<bool> {
        let updated = with_pool!(self.pool, pool => {
            sqlx::query("UPDATE comments SET status = ?, updated_at = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(Utc::now())
                .bind(id)
                .execute(pool)
                .await
                .context("Failed to update comment status")?
                .rows_affected()
        });
        Ok(updated > 0)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let removed = with_pool!(self.pool, pool => {
            let mut tx = pool.begin().await.context("Failed to begin transaction")?;
            sqlx::query("DELETE FROM comments WHERE parent_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete replies")?;
            let removed = sqlx::query("DELETE FROM comments WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete comment")?
                .rows_affected();
            tx.commit().await.context("Failed to commit comment delete")?;
            removed
        });
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::{SqlxStoryRepository, SqlxUserRepository, StoryRepository, UserRepository};
    use crate::db::{create_test_pool, migrations};
    use crate::models::{AccessLevel, CreateUserInput, NewStory, NewStoryContent, UserRole};

    async fn setup() -> (SqlxCommentRepository, i64, i64, i64) {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let users = SqlxUserRepository::new(pool.clone());
        let mut ids = Vec::new();
        for name in ["author", "reader"] {
            let user = users
                .create(&CreateUserInput {
                    username: name.into(),
                    email: format!("{}@example.com", name),
                    password_hash: "h".into(),
                    role: UserRole::Member,
                    preferred_language: None,
                })
                .await
                .unwrap();
            ids.push(user.id);
        }
        let story = SqlxStoryRepository::new(pool.clone())
            .create(&NewStory {
                author_id: ids[0],
                category_id: None,
                slug: "s".into(),
                access_level: AccessLevel::Public,
                original_language: "en".into(),
                content: NewStoryContent {
                    language: "en".into(),
                    title: "T".into(),
                    summary: None,
                    body: "b".into(),
                    body_html: "b".into(),
                    translator_id: None,
                },
            })
            .await
            .unwrap();
        (SqlxCommentRepository::new(pool), story.id, ids[0], ids[1])
    }

    fn new_comment(story_id: i64, user_id: i64, status: CommentStatus) -> NewComment {
        NewComment {
            story_id,
            user_id,
            parent_id: None,
            content: "Thank you for sharing".into(),
            status,
        }
    }

    #[tokio::test]
    async fn test_pending_hidden_unless_requested() {
        let (repo, story, author, reader) = setup().await;
        repo.create(&new_comment(story, author, CommentStatus::Approved)).await.unwrap();
        let pending = repo.create(&new_comment(story, reader, CommentStatus::Pending)).await.unwrap();

        let public = repo.list_for_story(story, false).await.unwrap();
        assert_eq!(public.len(), 1);
        assert!(public[0].is_story_author);
        assert_eq!(public[0].author_name, "author");

        assert_eq!(repo.list_for_story(story, true).await.unwrap().len(), 2);

        let params = ListParams::default();
        let (queue, total) = repo.list_by_status(CommentStatus::Pending, &params).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(queue[0].comment.id, pending.id);

        assert!(repo.update_status(pending.id, CommentStatus::Approved).await.unwrap());
        assert_eq!(repo.list_for_story(story, false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_removes_replies() {
        let (repo, story, author, reader) = setup().await;
        let parent = repo.create(&new_comment(story, reader, CommentStatus::Approved)).await.unwrap();
        let mut reply = new_comment(story, author, CommentStatus::Approved);
        reply.parent_id = Some(parent.id);
        let reply = repo.create(&reply).await.unwrap();

        assert!(repo.delete(parent.id).await.unwrap());
        assert!(repo.get_by_id(reply.id).await.unwrap().is_none());
        assert!(!repo.delete(parent.id).await.unwrap());
    }
}
