//! Story repository
//!
//! Stories, their per-language contents and their tags. Writes touching more
//! than one table run inside a transaction.

use crate::config::DatabaseDriver;
use crate::db::{DynDatabasePool, InsertId};
use crate::models::{
    AccessLevel, ListParams, NewStory, NewStoryContent, Story, StoryContent, StoryFilter,
    StoryStatus, StorySummary,
};
use crate::with_pool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

const STORY_COLUMNS: &str = "id, author_id, category_id, slug, status, access_level, \
     original_language, is_featured, view_count, moderation_note, moderated_by, moderated_at, \
     published_at, created_at, updated_at";

const CONTENT_COLUMNS: &str = "id, story_id, language, title, summary, body, body_html, \
     translator_id, created_at, updated_at";

/// Shared WHERE clause of the story listing and its count.
///
/// Every optional filter is bound twice, the access-level list is padded to
/// four slots.
const FILTER_CLAUSE: &str = r#"
    WHERE (? IS NULL OR s.status = ?)
      AND (? IS NULL OR s.author_id = ?)
      AND (? IS NULL OR s.category_id = ?)
      AND (? IS NULL OR EXISTS (
            SELECT 1 FROM story_tags st JOIN tags t ON t.id = st.tag_id
            WHERE st.story_id = s.id AND t.slug = ?))
      AND (? IS NULL OR EXISTS (
            SELECT 1 FROM story_contents lc
            WHERE lc.story_id = s.id AND lc.language = ?))
      AND (? = 0 OR s.access_level IN (?, ?, ?, ?))
      AND (? = 0 OR s.is_featured = 1)
"#;

macro_rules! story_from_row {
    ($row:expr) => {
        Story {
            id: $row.try_get("id")?,
            author_id: $row.try_get("author_id")?,
            category_id: $row.try_get("category_id")?,
            slug: $row.try_get("slug")?,
            status: StoryStatus::from_str(&$row.try_get::<String, _>("status")?)?,
            access_level: AccessLevel::from_str(&$row.try_get::<String, _>("access_level")?)?,
            original_language: $row.try_get("original_language")?,
            is_featured: $row.try_get("is_featured")?,
            view_count: $row.try_get("view_count")?,
            moderation_note: $row.try_get("moderation_note")?,
            moderated_by: $row.try_get("moderated_by")?,
            moderated_at: $row.try_get("moderated_at")?,
            published_at: $row.try_get("published_at")?,
            created_at: $row.try_get("created_at")?,
            updated_at: $row.try_get("updated_at")?,
        }
    };
}

macro_rules! content_from_row {
    ($row:expr) => {
        StoryContent {
            id: $row.try_get("id")?,
            story_id: $row.try_get("story_id")?,
            language: $row.try_get("language")?,
            title: $row.try_get("title")?,
            summary: $row.try_get("summary")?,
            body: $row.try_get("body")?,
            body_html: $row.try_get("body_html")?,
            translator_id: $row.try_get("translator_id")?,
            created_at: $row.try_get("created_at")?,
            updated_at: $row.try_get("updated_at")?,
        }
    };
}

macro_rules! bind_filter {
    ($query:expr, $f:expr) => {
        $query
            .bind($f.status)
            .bind($f.status)
            .bind($f.author_id)
            .bind($f.author_id)
            .bind($f.category_id)
            .bind($f.category_id)
            .bind($f.tag_slug)
            .bind($f.tag_slug)
            .bind($f.language)
            .bind($f.language)
            .bind($f.restrict_access)
            .bind($f.access[0])
            .bind($f.access[1])
            .bind($f.access[2])
            .bind($f.access[3])
            .bind($f.featured_only)
    };
}

/// `StoryFilter` flattened into bind values
struct FilterBinds<'a> {
    status: Option<&'static str>,
    author_id: Option<i64>,
    category_id: Option<i64>,
    tag_slug: Option<&'a str>,
    language: Option<&'a str>,
    restrict_access: i64,
    access: [&'static str; 4],
    featured_only: i64,
}

impl<'a> FilterBinds<'a> {
    fn new(filter: &'a StoryFilter) -> Self {
        let (restrict_access, access) = match &filter.access_levels {
            None => (0, ["public"; 4]),
            Some(levels) => {
                // An empty list matches nothing
                let mut slots = ["-"; 4];
                for (slot, level) in slots.iter_mut().zip(levels.iter()) {
                    *slot = level.as_str();
                }
                if let Some(first) = levels.first() {
                    for slot in slots.iter_mut().skip(levels.len()) {
                        *slot = first.as_str();
                    }
                }
                (1, slots)
            }
        };
        Self {
            status: filter.status.map(|s| s.as_str()),
            author_id: filter.author_id,
            category_id: filter.category_id,
            tag_slug: filter.tag_slug.as_deref(),
            language: filter.language.as_deref(),
            restrict_access,
            access,
            featured_only: i64::from(filter.featured_only),
        }
    }
}

/// A status change applied by `update_status`
#[derive(Debug, Clone)]
pub struct StatusChange {
    /// Status the story must currently have
    pub from: StoryStatus,
    pub to: StoryStatus,
    pub moderation_note: Option<String>,
    /// Set when a moderator made the change
    pub moderated_by: Option<i64>,
}

/// Story repository trait
#[async_trait]
pub trait StoryRepository: Send + Sync {
    /// Insert a draft story together with its original-language content
    async fn create(&self, story: &NewStory) -> Result<Story>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Story>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Story>>;

    async fn slug_exists(&self, slug: &str) -> Result<bool>;

    /// List stories matching `filter`.
    ///
    /// Titles come from the `display_language` content when present, else
    /// from the original-language content.
    async fn list(
        &self,
        filter: &StoryFilter,
        display_language: &str,
        params: &ListParams,
    ) -> Result<(Vec<StorySummary>, i64)>;

    /// Persist category, access level and featured flag
    async fn update_meta(&self, story: &Story) -> Result<()>;

    /// Move a story between statuses.
    ///
    /// Returns false when the story no longer has `change.from`.
    async fn update_status(&self, id: i64, change: &StatusChange) -> Result<bool>;

    async fn increment_views(&self, id: i64) -> Result<()>;

    /// Delete a story with its contents, tags and comments
    async fn delete(&self, id: i64) -> Result<()>;

    /// Replace the tags of a story
    async fn set_tags(&self, story_id: i64, tag_ids: &[i64]) -> Result<()>;

    async fn get_content(&self, story_id: i64, language: &str) -> Result<Option<StoryContent>>;

    /// All contents of a story, original language first
    async fn list_contents(&self, story_id: i64) -> Result<Vec<StoryContent>>;

    /// Insert or replace the content for `(story_id, content.language)`
    async fn upsert_content(&self, story_id: i64, content: &NewStoryContent)
        -> Result<StoryContent>;

    /// Returns whether a row was removed
    async fn delete_content(&self, story_id: i64, language: &str) -> Result<bool>;
}

/// SQLx-based story repository implementation
pub struct SqlxStoryRepository {
    pool: DynDatabasePool,
}

impl SqlxStoryRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn StoryRepository> {
        Arc::new(Self::new(pool))
    }

    async fn get_where(&self, column: &str, value: StoryKey<'_>) -> Result<Option<Story>> {
        let sql = format!("SELECT {} FROM stories WHERE {} = ?", STORY_COLUMNS, column);
        let story = with_pool!(self.pool, pool => {
            let query = sqlx::query(&sql);
            let query = match value {
                StoryKey::Id(id) => query.bind(id),
                StoryKey::Slug(slug) => query.bind(slug),
            };
            let row = query
                .fetch_optional(pool)
                .await
                .context("Failed to get story")?;
            match row {
                Some(row) => Some(story_from_row!(row)),
                None => None,
            }
        });
        Ok(story)
    }
}

enum StoryKey<'a> {
    Id(i64),
    Slug(&'a str),
}

#[async_trait]
impl StoryRepository for SqlxStoryRepository {
    async fn create(&self, story: &NewStory) -> Result<Story> {
        let now = Utc::now();
        let content = &story.content;
        let id = with_pool!(self.pool, pool => {
            let mut tx = pool.begin().await.context("Failed to begin transaction")?;
            let id = sqlx::query(
                r#"
                INSERT INTO stories (author_id, category_id, slug, status, access_level,
                    original_language, is_featured, view_count, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
                "#,
            )
            .bind(story.author_id)
            .bind(story.category_id)
            .bind(&story.slug)
            .bind(StoryStatus::Draft.as_str())
            .bind(story.access_level.as_str())
            .bind(&story.original_language)
            .bind(false)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to create story")?
            .insert_id();

            sqlx::query(
                r#"
                INSERT INTO story_contents (story_id, language, title, summary, body, body_html,
                    translator_id, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id)
            .bind(&content.language)
            .bind(&content.title)
            .bind(&content.summary)
            .bind(&content.body)
            .bind(&content.body_html)
            .bind(content.translator_id)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to create story content")?;

            tx.commit().await.context("Failed to commit story")?;
            id
        });

        Ok(Story {
            id,
            author_id: story.author_id,
            category_id: story.category_id,
            slug: story.slug.clone(),
            status: StoryStatus::Draft,
            access_level: story.access_level,
            original_language: story.original_language.clone(),
            is_featured: false,
            view_count: 0,
            moderation_note: None,
            moderated_by: None,
            moderated_at: None,
            published_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Story>> {
        self.get_where("id", StoryKey::Id(id)).await
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Story>> {
        self.get_where("slug", StoryKey::Slug(slug)).await
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool> {
        let count = with_pool!(self.pool, pool => {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM stories WHERE slug = ?")
                .bind(slug)
                .fetch_one(pool)
                .await
                .context("Failed to check story slug")?
        });
        Ok(count > 0)
    }

    async fn list(
        &self,
        filter: &StoryFilter,
        display_language: &str,
        params: &ListParams,
    ) -> Result<(Vec<StorySummary>, i64)> {
        let binds = FilterBinds::new(filter);
        let list_sql = format!(
            r#"
            SELECT s.id, s.slug, s.status, s.access_level, s.author_id, s.view_count,
                   s.is_featured, s.moderation_note, s.published_at, s.updated_at,
                   COALESCE(dc.language, oc.language) AS language,
                   COALESCE(dc.title, oc.title) AS title,
                   CASE WHEN dc.id IS NULL THEN oc.summary ELSE dc.summary END AS summary,
                   COALESCE(NULLIF(TRIM(u.display_name), ''), u.username) AS author_name
            FROM stories s
            JOIN users u ON u.id = s.author_id
            JOIN story_contents oc ON oc.story_id = s.id AND oc.language = s.original_language
            LEFT JOIN story_contents dc ON dc.story_id = s.id AND dc.language = ?
            {}
            ORDER BY COALESCE(s.published_at, s.updated_at) DESC, s.id DESC
            LIMIT ? OFFSET ?
            "#,
            FILTER_CLAUSE
        );
        let count_sql = format!("SELECT COUNT(*) FROM stories s {}", FILTER_CLAUSE);

        let result = with_pool!(self.pool, pool => {
            let query = sqlx::query(&list_sql).bind(display_language);
            let rows = bind_filter!(query, binds)
                .bind(params.limit())
                .bind(params.offset())
                .fetch_all(pool)
                .await
                .context("Failed to list stories")?;

            let total = bind_filter!(sqlx::query_scalar::<_, i64>(&count_sql), binds)
                .fetch_one(pool)
                .await
                .context("Failed to count stories")?;

            let mut stories = Vec::with_capacity(rows.len());
            for row in rows {
                stories.push(StorySummary {
                    id: row.try_get("id")?,
                    slug: row.try_get("slug")?,
                    status: StoryStatus::from_str(&row.try_get::<String, _>("status")?)?,
                    access_level: AccessLevel::from_str(&row.try_get::<String, _>("access_level")?)?,
                    language: row.try_get("language")?,
                    title: row.try_get("title")?,
                    summary: row.try_get("summary")?,
                    author_id: row.try_get("author_id")?,
                    author_name: row.try_get("author_name")?,
                    view_count: row.try_get("view_count")?,
                    is_featured: row.try_get("is_featured")?,
                    moderation_note: row.try_get("moderation_note")?,
                    published_at: row.try_get("published_at")?,
                    updated_at: row.try_get("updated_at")?,
                });
            }
            (stories, total)
        });
        Ok(result)
    }

    async fn update_meta(&self, story: &Story) -> Result<()> {
        with_pool!(self.pool, pool => {
            sqlx::query(
                "UPDATE stories SET category_id = ?, access_level = ?, is_featured = ?, updated_at = ? WHERE id = ?",
            )
            .bind(story.category_id)
            .bind(story.access_level.as_str())
            .bind(story.is_featured)
            .bind(Utc::now())
            .bind(story.id)
            .execute(pool)
            .await
            .context("Failed to update story")?;
        });
        Ok(())
    }

    async fn update_status(&self, id: i64, change: &StatusChange) -> Result<bool> {
        let now = Utc::now();
        let published_at: Option<DateTime<Utc>> =
            (change.to == StoryStatus::Published).then_some(now);
        let moderated_at: Option<DateTime<Utc>> = change.moderated_by.map(|_| now);
        let updated = with_pool!(self.pool, pool => {
            sqlx::query(
                r#"
                UPDATE stories
                SET status = ?, moderation_note = ?,
                    moderated_by = COALESCE(?, moderated_by),
                    moderated_at = COALESCE(?, moderated_at),
                    published_at = COALESCE(?, published_at),
                    updated_at = ?
                WHERE id = ? AND status = ?
                "#,
            )
            .bind(change.to.as_str())
            .bind(&change.moderation_note)
            .bind(change.moderated_by)
            .bind(moderated_at)
            .bind(published_at)
            .bind(now)
            .bind(id)
            .bind(change.from.as_str())
            .execute(pool)
            .await
            .context("Failed to update story status")?
            .rows_affected()
        });
        Ok(updated > 0)
    }

    async fn increment_views(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, pool => {
            sqlx::query("UPDATE stories SET view_count = view_count + 1 WHERE id = ?")
                .bind(id)
                .execute(pool)
                .await
                .context("Failed to increment story views")?;
        });
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, pool => {
            let mut tx = pool.begin().await.context("Failed to begin transaction")?;
            for sql in [
                "DELETE FROM story_tags WHERE story_id = ?",
                "DELETE FROM comments WHERE story_id = ?",
                "DELETE FROM story_contents WHERE story_id = ?",
                "DELETE FROM stories WHERE id = ?",
            ] {
                sqlx::query(sql)
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .with_context(|| format!("Failed to delete story {}", id))?;
            }
            tx.commit().await.context("Failed to commit story delete")?;
        });
        Ok(())
    }

    async fn set_tags(&self, story_id: i64, tag_ids: &[i64]) -> Result<()> {
        with_pool!(self.pool, pool => {
            let mut tx = pool.begin().await.context("Failed to begin transaction")?;
            sqlx::query("DELETE FROM story_tags WHERE story_id = ?")
                .bind(story_id)
                .execute(&mut *tx)
                .await
                .context("Failed to clear story tags")?;
            for tag_id in tag_ids {
                sqlx::query("INSERT INTO story_tags (story_id, tag_id) VALUES (?, ?)")
                    .bind(story_id)
                    .bind(tag_id)
                    .execute(&mut *tx)
                    .await
                    .context("Failed to attach tag")?;
            }
            tx.commit().await.context("Failed to commit story tags")?;
        });
        Ok(())
    }

    async fn get_content(&self, story_id: i64, language: &str) -> Result<Option<StoryContent>> {
        let sql = format!(
            "SELECT {} FROM story_contents WHERE story_id = ? AND language = ?",
            CONTENT_COLUMNS
        );
        let content = with_pool!(self.pool, pool => {
            let row = sqlx::query(&sql)
                .bind(story_id)
                .bind(language)
                .fetch_optional(pool)
                .await
                .context("Failed to get story content")?;
            match row {
                Some(row) => Some(content_from_row!(row)),
                None => None,
            }
        });
        Ok(content)
    }

    async fn list_contents(&self, story_id: i64) -> Result<Vec<StoryContent>> {
        let sql = format!(
            r#"
            SELECT c.{} FROM story_contents c
            JOIN stories s ON s.id = c.story_id
            WHERE c.story_id = ?
            ORDER BY CASE WHEN c.language = s.original_language THEN 0 ELSE 1 END, c.language
            "#,
            CONTENT_COLUMNS.replace(", ", ", c.")
        );
        let contents = with_pool!(self.pool, pool => {
            let rows = sqlx::query(&sql)
                .bind(story_id)
                .fetch_all(pool)
                .await
                .context("Failed to list story contents")?;
            let mut contents = Vec::with_capacity(rows.len());
            for row in rows {
                contents.push(content_from_row!(row));
            }
            contents
        });
        Ok(contents)
    }

    async fn upsert_content(
        &self,
        story_id: i64,
        content: &NewStoryContent,
    ) -> Result<StoryContent> {
        let now = Utc::now();
        let sql = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                r#"
                INSERT INTO story_contents (story_id, language, title, summary, body, body_html,
                    translator_id, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT (story_id, language) DO UPDATE SET
                    title = excluded.title, summary = excluded.summary, body = excluded.body,
                    body_html = excluded.body_html, translator_id = excluded.translator_id,
                    updated_at = excluded.updated_at
                "#
            }
            DatabaseDriver::Mysql => {
                r#"
                INSERT INTO story_contents (story_id, language, title, summary, body, body_html,
                    translator_id, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON DUPLICATE KEY UPDATE
                    title = VALUES(title), summary = VALUES(summary), body = VALUES(body),
                    body_html = VALUES(body_html), translator_id = VALUES(translator_id),
                    updated_at = VALUES(updated_at)
                "#
            }
        };

        with_pool!(self.pool, pool => {
            let mut tx = pool.begin().await.context("Failed to begin transaction")?;
            sqlx::query(sql)
                .bind(story_id)
                .bind(&content.language)
                .bind(&content.title)
                .bind(&content.summary)
                .bind(&content.body)
                .bind(&content.body_html)
                .bind(content.translator_id)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .context("Failed to save story content")?;
            sqlx::query("UPDATE stories SET updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(story_id)
                .execute(&mut *tx)
                .await
                .context("Failed to touch story")?;
            tx.commit().await.context("Failed to commit story content")?;
        });

        self.get_content(story_id, &content.language)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Story content vanished after save"))
    }

    async fn delete_content(&self, story_id: i64, language: &str) -> Result<bool> {
        let removed = with_pool!(self.pool, pool => {
            sqlx::query("DELETE FROM story_contents WHERE story_id = ? AND language = ?")
                .bind(story_id)
                .bind(language)
                .execute(pool)
                .await
                .context("Failed to delete story content")?
                .rows_affected()
        });
        Ok(removed > 0)
    }
}
