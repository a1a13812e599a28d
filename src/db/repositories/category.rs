//! Category repository

use crate::db::{DynDatabasePool, InsertId};
use crate::models::{Category, CategoryWithCount};
use crate::with_pool;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use std::sync::Arc;

macro_rules! category_from_row {
    ($row:expr) => {
        Category {
            id: $row.try_get("id")?,
            slug: $row.try_get("slug")?,
            name: $row.try_get("name")?,
            description: $row.try_get("description")?,
            sort_order: $row.try_get("sort_order")?,
            created_at: $row.try_get("created_at")?,
        }
    };
}

/// Category repository trait
#[async_trait]
pub trait CategoryRepository: Send + Sync {
    async fn create(
        &self,
        slug: &str,
        name: &str,
        description: Option<&str>,
        sort_order: i64,
    ) -> Result<Category>;

    async fn get_by_id(&self, id: i64) -> Result<Option<Category>>;

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Category>>;

    /// All categories ordered for display
    async fn list(&self) -> Result<Vec<Category>>;

    /// All categories with their published story counts
    async fn list_with_counts(&self) -> Result<Vec<CategoryWithCount>>;

    async fn update(&self, category: &Category) -> Result<()>;

    /// Delete a category; its stories become uncategorized
    async fn delete(&self, id: i64) -> Result<()>;
}

pub struct SqlxCategoryRepository {
    pool: DynDatabasePool,
}

impl SqlxCategoryRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn CategoryRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl CategoryRepository for SqlxCategoryRepository {
    async fn create(
        &self,
        slug: &str,
        name: &str,
        description: Option<&str>,
        sort_order: i64,
    ) -> Result<Category> {
        let now = chrono::Utc::now();
        let id = with_pool!(self.pool, pool => {
            sqlx::query(
                "INSERT INTO categories (slug, name, description, sort_order, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(slug)
            .bind(name)
            .bind(description)
            .bind(sort_order)
            .bind(now)
            .execute(pool)
            .await
            .context("Failed to create category")?
            .insert_id()
        });
        Ok(Category {
            id,
            slug: slug.to_string(),
            name: name.to_string(),
            description: description.map(str::to_string),
            sort_order,
            created_at: now,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Category>> {
        let category = with_pool!(self.pool, pool => {
            let row = sqlx::query(
                "SELECT id, slug, name, description, sort_order, created_at FROM categories WHERE id = ?",
            )
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("Failed to get category")?;
            match row {
                Some(row) => Some(category_from_row!(row)),
                None => None,
            }
        });
        Ok(category)
    }

    async fn get_by_slug(&self, slug: &str) -> Result<Option<Category>> {
        let category = with_pool!(self.pool, pool => {
            let row = sqlx::query(
                "SELECT id, slug, name, description, sort_order, created_at FROM categories WHERE slug = ?",
            )
            .bind(slug)
            .fetch_optional(pool)
            .await
            .context("Failed to get category by slug")?;
            match row {
                Some(row) => Some(category_from_row!(row)),
                None => None,
            }
        });
        Ok(category)
    }

    async fn list(&self) -> Result<Vec<Category>> {
        let categories = with_pool!(self.pool, pool => {
            let rows = sqlx::query(
                "SELECT id, slug, name, description, sort_order, created_at FROM categories ORDER BY sort_order, name",
            )
            .fetch_all(pool)
            .await
            .context("Failed to list categories")?;
            let mut categories = Vec::with_capacity(rows.len());
            for row in rows {
                categories.push(category_from_row!(row));
            }
            categories
        });
        Ok(categories)
    }

    async fn list_with_counts(&self) -> Result<Vec<CategoryWithCount>> {
        let categories = with_pool!(self.pool, pool => {
            let rows = sqlx::query(
                r#"
                SELECT c.id, c.slug, c.name, c.description, c.sort_order, c.created_at,
                       COUNT(s.id) AS story_count
                FROM categories c
                LEFT JOIN stories s ON s.category_id = c.id AND s.status = 'published'
                GROUP BY c.id, c.slug, c.name, c.description, c.sort_order, c.created_at
                ORDER BY c.sort_order, c.name
                "#,
            )
            .fetch_all(pool)
            .await
            .context("Failed to list categories with counts")?;
            let mut categories = Vec::with_capacity(rows.len());
            for row in rows {
                categories.push(CategoryWithCount {
                    story_count: row.try_get("story_count")?,
                    category: category_from_row!(row),
                });
            }
            categories
        });
        Ok(categories)
    }

    async fn update(&self, category: &Category) -> Result<()> {
        with_pool!(self.pool, pool => {
            sqlx::query(
                "UPDATE categories SET slug = ?, name = ?, description = ?, sort_order = ? WHERE id = ?",
            )
            .bind(&category.slug)
            .bind(&category.name)
            .bind(&category.description)
            .bind(category.sort_order)
            .bind(category.id)
            .execute(pool)
            .await
            .context("Failed to update category")?;
        });
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<()> {
        with_pool!(self.pool, pool => {
            let mut tx = pool.begin().await.context("Failed to begin transaction")?;
            sqlx::query("UPDATE stories SET category_id = NULL WHERE category_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to detach stories from category")?;
            sqlx::query("DELETE FROM categories WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .context("Failed to delete category")?;
            tx.commit().await.context("Failed to commit category delete")?;
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};

    async fn setup() -> SqlxCategoryRepository {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        SqlxCategoryRepository::new(pool)
    }

    #[tokio::test]
    async fn test_seeded_categories_ordered() {
        let repo = setup().await;
        let categories = repo.list().await.unwrap();
        let slugs: Vec<_> = categories.iter().map(|c| c.slug.as_str()).collect();
        assert_eq!(slugs, vec!["living-with-ckd", "dialysis", "transplant", "caregivers"]);
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let repo = setup().await;
        let mut category = repo.create("diet", "Diet", Some("Food and fluids"), 0).await.unwrap();
        assert_eq!(repo.get_by_slug("diet").await.unwrap().unwrap().id, category.id);

        category.name = "Diet & fluids".into();
        repo.update(&category).await.unwrap();
        assert_eq!(repo.get_by_id(category.id).await.unwrap().unwrap().name, "Diet & fluids");

        let counts = repo.list_with_counts().await.unwrap();
        assert!(counts.iter().all(|c| c.story_count == 0));

        repo.delete(category.id).await.unwrap();
        assert!(repo.get_by_id(category.id).await.unwrap().is_none());
    }
}
