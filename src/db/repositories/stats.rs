//! Statistics queries
//!
//! Aggregates are computed with `COUNT(CASE ...)` so both backends return
//! plain integers.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{
    CommentStatistics, LanguageCount, SiteStatistics, StoryStatistics, TopStory, UserStatistics,
};
use crate::with_pool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::sync::Arc;

#[async_trait]
pub trait StatisticsRepository: Send + Sync {
    /// Collect site statistics; users created after `recent_since` count as new
    async fn site_statistics(
        &self,
        recent_since: DateTime<Utc>,
        top_limit: i64,
    ) -> Result<SiteStatistics>;
}

pub struct SqlxStatisticsRepository {
    pool: DynDatabasePool,
}

impl SqlxStatisticsRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn StatisticsRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl StatisticsRepository for SqlxStatisticsRepository {
    async fn site_statistics(
        &self,
        recent_since: DateTime<Utc>,
        top_limit: i64,
    ) -> Result<SiteStatistics> {
        // MySQL returns DECIMAL for SUM
        let views_sql = match self.pool.driver() {
            DatabaseDriver::Sqlite => "SELECT COALESCE(SUM(view_count), 0) FROM stories",
            DatabaseDriver::Mysql => "SELECT CAST(COALESCE(SUM(view_count), 0) AS SIGNED) FROM stories",
        };

        let statistics = with_pool!(self.pool, pool => {
            let row = sqlx::query(
                r#"
                SELECT COUNT(*) AS total,
                       COUNT(CASE WHEN role = 'admin' THEN 1 END) AS admins,
                       COUNT(CASE WHEN role = 'moderator' THEN 1 END) AS moderators,
                       COUNT(CASE WHEN role = 'member' THEN 1 END) AS members,
                       COUNT(CASE WHEN status = 'banned' THEN 1 END) AS banned,
                       COUNT(CASE WHEN is_verified = 1 THEN 1 END) AS verified,
                       COUNT(CASE WHEN is_premium = 1 THEN 1 END) AS premium,
                       COUNT(CASE WHEN created_at >= ? THEN 1 END) AS new_recently
                FROM users
                "#,
            )
            .bind(recent_since)
            .fetch_one(pool)
            .await
            .context("Failed to collect user statistics")?;
            let users = UserStatistics {
                total: row.try_get("total")?,
                admins: row.try_get("admins")?,
                moderators: row.try_get("moderators")?,
                members: row.try_get("members")?,
                banned: row.try_get("banned")?,
                verified: row.try_get("verified")?,
                premium: row.try_get("premium")?,
                new_recently: row.try_get("new_recently")?,
            };

            let row = sqlx::query(
                r#"
                SELECT COUNT(*) AS total,
                       COUNT(CASE WHEN status = 'draft' THEN 1 END) AS draft,
                       COUNT(CASE WHEN status = 'pending_review' THEN 1 END) AS pending_review,
                       COUNT(CASE WHEN status = 'published' THEN 1 END) AS published,
                       COUNT(CASE WHEN status = 'rejected' THEN 1 END) AS rejected,
                       COUNT(CASE WHEN is_featured = 1 THEN 1 END) AS featured
                FROM stories
                "#,
            )
            .fetch_one(pool)
            .await
            .context("Failed to collect story statistics")?;
            let total_views = sqlx::query_scalar::<_, i64>(views_sql)
                .fetch_one(pool)
                .await
                .context("Failed to sum story views")?;
            let stories = StoryStatistics {
                total: row.try_get("total")?,
                draft: row.try_get("draft")?,
                pending_review: row.try_get("pending_review")?,
                published: row.try_get("published")?,
                rejected: row.try_get("rejected")?,
                featured: row.try_get("featured")?,
                total_views,
            };

            let row = sqlx::query(
                r#"
                SELECT COUNT(*) AS total,
                       COUNT(CASE WHEN status = 'pending' THEN 1 END) AS pending,
                       COUNT(CASE WHEN status = 'approved' THEN 1 END) AS approved,
                       COUNT(CASE WHEN status = 'rejected' THEN 1 END) AS rejected
                FROM comments
                "#,
            )
            .fetch_one(pool)
            .await
            .context("Failed to collect comment statistics")?;
            let comments = CommentStatistics {
                total: row.try_get("total")?,
                pending: row.try_get("pending")?,
                approved: row.try_get("approved")?,
                rejected: row.try_get("rejected")?,
            };

            let rows = sqlx::query(
                "SELECT language, COUNT(*) AS contents FROM story_contents GROUP BY language ORDER BY contents DESC, language",
            )
            .fetch_all(pool)
            .await
            .context("Failed to count contents per language")?;
            let mut languages = Vec::with_capacity(rows.len());
            for row in rows {
                languages.push(LanguageCount {
                    language: row.try_get("language")?,
                    contents: row.try_get("contents")?,
                });
            }

            let rows = sqlx::query(
                r#"
                SELECT s.id, s.slug, c.title, s.view_count
                FROM stories s
                JOIN story_contents c ON c.story_id = s.id AND c.language = s.original_language
                WHERE s.status = 'published'
                ORDER BY s.view_count DESC, s.id
                LIMIT ?
                "#,
            )
            .bind(top_limit)
            .fetch_all(pool)
            .await
            .context("Failed to list top stories")?;
            let mut top_stories = Vec::with_capacity(rows.len());
            for row in rows {
                top_stories.push(TopStory {
                    id: row.try_get("id")?,
                    slug: row.try_get("slug")?,
                    title: row.try_get("title")?,
                    view_count: row.try_get("view_count")?,
                });
            }

            SiteStatistics {
                users,
                stories,
                comments,
                languages,
                top_stories,
                generated_at: Utc::now(),
            }
        });
        Ok(statistics)
    }
}
