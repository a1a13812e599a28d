//! Tag repository

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{Tag, TagWithCount};
use crate::with_pool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use std::sync::Arc;

macro_rules! tag_from_row {
    ($row:expr) => {
        Tag {
            id: $row.try_get("id")?,
            slug: $row.try_get("slug")?,
            name: $row.try_get("name")?,
            created_at: $row.try_get("created_at")?,
        }
    };
}

/// Tag repository trait
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// Return the tag with `slug`, creating it with `name` when missing
    async fn get_or_create(&self, slug: &str, name: &str) -> Result<Tag>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tag>>;

    /// Tags with published story counts, most used first
    async fn list_with_counts(&self, limit: i64) -> Result<Vec<TagWithCount>>;

    /// Tags attached to a story
    async fn list_for_story(&self, story_id: i64) -> Result<Vec<Tag>>;

    async fn delete(&self, id: i64) -> Result<()>;
}

pub struct SqlxTagRepository {
    pool: DynDatabasePool,
}

impl SqlxTagRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn TagRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl TagRepository for SqlxTagRepository {
    async fn get_or_create(&self, slug: &str, name: &str) -> Result<Tag> {
        if let Some(tag) = self.get_by_slug(slug).await? {
            return Ok(tag);
        }
        let now = Utc::now();
        let id = with_pool!(self.pool, pool => {
            sqlx::query("INSERT INTO tags (slug, name, created_at) VALUES (?, ?, ?)")
                .bind(slug)
                .bind(name)
                .bind(now)
                .execute(pool)
                .await
                .context("Failed to create tag")?
                .insert_id()
        });
        Ok(Tag {
            id,
            slug: slug.to_string(),
            name: name.to_string(),
            created_at: now,
        })
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Tag>> {
        let tag = with_pool!(self.pool, pool => {
            let row = sqlx::query("SELECT id, slug, name, created_at FROM tags WHERE slug = ?")
                .bind(slug)
                .fetch_optional(pool)
                .await
                .context("Failed to get tag")?;
            match row {
                Some(row) => Some(tag_from_row!(row)),
                None => None,
            }
        });
        Ok(tag)
    }

    async fn list_with_counts(&self, limit: i64) -> Result<Vec<TagWithCount>> {
        let tags = with_pool!(self.pool, pool => {
            let rows = sqlx::query(
                r#"
                SELECT t.id, t.slug, t.name, t.created_at, COUNT(s.id) AS story_count
                FROM tags t
                LEFT JOIN story_tags st ON st.tag_id = t.id
                LEFT JOIN stories s ON s.id = st.story_id AND s.status = 'published'
                GROUP BY t.id, t.slug, t.name, t.created_at
                ORDER BY story_count DESC, t.name
                LIMIT ?
                "#,
            )
            .bind(limit)
            .fetch_all(pool)
            .await
            .context("Failed to list tags")?;
            let mut tags = Vec::with_capacity(rows.len());
            for row in rows {
                tags.push(TagWithCount {
                    story_count: row.try_get("story_count")?,
                    tag: tag_from_row!(row),
                });
            }
            tags
        });
        Ok(tags)
    }

    async fn list_for_story(&self, story_id: i64) -> Result<Vec<Tag>> {
        let tags = with_pool!(self.pool, pool => {
            let rows = sqlx::query(
                r#"
                SELECT t.id, t.slug, t.name, t.created_at
                FROM tags t
                JOIN story_tags st ON st.tag_id = t.id
                WHERE st.story_id = ?
                ORDER BY t.name
                "#,
            )
            .bind(story_id)
            .fetch_all(pool)
            .await
            .context("Failed to list story tags")?;
            let mut tags = Vec::with_capacity(rows.len());
            for row in rows {
                tags.push(tag_from_row!(row));
            }
            tags
        });
        Ok(tags)
    }

    async fn delete(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, pool => {
            sqlx::query("DELETE FROM tags WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await
                .context("Failed to delete tag")?;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    #[tokio::test]
    async fn test_get_or_create_reuses_existing() {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let repo = SqlxTagRepository::new(pool);

        let first = repo.get_or_create("hope", "Hope").await.unwrap();
        let second = repo.get_or_create("hope", "HOPE").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Hope");

        let listed = repo.list_with_counts(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].story_count, 0);

        repo.delete(first.id).await.unwrap();
        assert!(repo.get_by_slug("hope").await.unwrap().is_none());
    }
}
