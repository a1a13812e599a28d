//! Category service
//!
//! Admin-managed story categories. The ordered list is cached because every
//! page renders it in the navigation.

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::CategoryRepository;
use crate::models::{Category, CategoryWithCount, CreateCategoryInput, UpdateCategoryInput};
use crate::services::story::STORY_CACHE_PATTERN;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;

const CATEGORY_CACHE_TTL: Duration = Duration::from_secs(3600);
const CACHE_KEY_CATEGORY_LIST: &str = "category:list";

const MAX_NAME_LENGTH: usize = 64;

/// Error types for category service operations
#[derive(Debug, thiserror::Error)]
pub enum CategoryServiceError {
    #[error("Category slug already exists: {0}")]
    DuplicateSlug(String),

    #[error("Category not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct CategoryService {
    repo: Arc<dyn CategoryRepository>,
    cache: Arc<Cache>,
}

impl CategoryService {
    pub fn new(repo: Arc<dyn CategoryRepository>, cache: Arc<Cache>) -> Self {
        Self { repo, cache }
    }

    /// Create a category; the slug defaults to one derived from the name
    pub async fn create(&self, input: CreateCategoryInput) -> Result<Category, CategoryServiceError> {
        let name = validate_name(&input.name)?;
        let slug = match input.slug.as_deref().map(str::trim) {
            Some(slug) if !slug.is_empty() => generate_slug(slug),
            _ => generate_slug(&name),
        };
        if slug.is_empty() {
            return Err(CategoryServiceError::ValidationError(
                "Category slug cannot be empty".to_string(),
            ));
        }
        if self
            .repo
            .get_by_slug(&slug)
            .await
            .context("Failed to check slug uniqueness")?
            .is_some()
        {
            return Err(CategoryServiceError::DuplicateSlug(slug));
        }

        let description = input
            .description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        let category = self
            .repo
            .create(&slug, &name, description.as_deref(), input.sort_order)
            .await
            .context("Failed to create category")?;

        self.invalidate_cache().await;
        tracing::info!("Created category {} ({})", category.name, category.slug);
        Ok(category)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Category>, CategoryServiceError> {
        Ok(self.repo.get_by_id(id).await.context("Failed to get category")?)
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Category>, CategoryServiceError> {
        Ok(self
            .repo
            .get_by_slug(slug)
            .await
            .context("Failed to get category")?)
    }

    /// All categories in display order
    pub async fn list(&self) -> Result<Vec<Category>, CategoryServiceError> {
        if let Ok(Some(categories)) = self.cache.get::<Vec<Category>>(CACHE_KEY_CATEGORY_LIST).await {
            return Ok(categories);
        }
        let categories = self.repo.list().await.context("Failed to list categories")?;
        let _ = self
            .cache
            .set(CACHE_KEY_CATEGORY_LIST, &categories, CATEGORY_CACHE_TTL)
            .await;
        Ok(categories)
    }

    /// Categories with their number of published stories
    pub async fn list_with_counts(&self) -> Result<Vec<CategoryWithCount>, CategoryServiceError> {
        Ok(self
            .repo
            .list_with_counts()
            .await
            .context("Failed to list categories")?)
    }

    pub async fn update(&self, id: i64, input: UpdateCategoryInput) -> Result<Category, CategoryServiceError> {
        let mut category = self
            .repo
            .get_by_id(id)
            .await
            .context("Failed to get category")?
            .ok_or_else(|| CategoryServiceError::NotFound(id.to_string()))?;

        if let Some(name) = input.name {
            category.name = validate_name(&name)?;
        }
        if let Some(slug) = input.slug {
            let slug = generate_slug(&slug);
            if slug.is_empty() {
                return Err(CategoryServiceError::ValidationError(
                    "Category slug cannot be empty".to_string(),
                ));
            }
            if slug != category.slug {
                if let Some(existing) = self.repo.get_by_slug(&slug).await.context("Failed to check slug")? {
                    if existing.id != id {
                        return Err(CategoryServiceError::DuplicateSlug(slug));
                    }
                }
                category.slug = slug;
            }
        }
        if let Some(description) = input.description {
            let description = description.trim().to_string();
            category.description = (!description.is_empty()).then_some(description);
        }
        if let Some(sort_order) = input.sort_order {
            category.sort_order = sort_order;
        }

        self.repo.update(&category).await.context("Failed to update category")?;
        self.invalidate_cache().await;
        self.invalidate_story_pages().await;
        Ok(category)
    }

    /// Delete a category; its stories become uncategorized
    pub async fn delete(&self, id: i64) -> Result<(), CategoryServiceError> {
        let category = self
            .repo
            .get_by_id(id)
            .await
            .context("Failed to get category")?
            .ok_or_else(|| CategoryServiceError::NotFound(id.to_string()))?;
        self.repo.delete(id).await.context("Failed to delete category")?;
        self.invalidate_cache().await;
        self.invalidate_story_pages().await;
        tracing::info!("Deleted category {}", category.slug);
        Ok(())
    }

    async fn invalidate_cache(&self) {
        let _ = self.cache.delete(CACHE_KEY_CATEGORY_LIST).await;
    }

    async fn invalidate_story_pages(&self) {
        if let Err(e) = self.cache.delete_pattern(STORY_CACHE_PATTERN).await {
            tracing::warn!("Failed to invalidate story cache: {}", e);
        }
    }
}

fn validate_name(name: &str) -> Result<String, CategoryServiceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CategoryServiceError::ValidationError(
            "Category name cannot be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(CategoryServiceError::ValidationError(format!(
            "Category name cannot exceed {} characters",
            MAX_NAME_LENGTH
        )));
    }
    Ok(name.to_string())
}

/// Generate a URL slug.
///
/// Lowercases, folds common Latin accents to ASCII, keeps other letters, and
/// collapses every run of separators into one hyphen.
pub fn generate_slug(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_hyphen = false;

    for c in text.to_lowercase().chars() {
        let c = fold_accent(c);
        if c.is_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }
    slug
}

fn fold_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' | 'å' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ñ' => 'n',
        'ç' => 'c',
        other => other,
    }
}
