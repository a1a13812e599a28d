//! Tag service
//!
//! Tags are created on demand from the names authors type when writing a
//! story, and reused by slug.

use crate::db::repositories::TagRepository;
use crate::models::{Tag, TagWithCount};
use crate::services::category::generate_slug;
use anyhow::Context;
use std::sync::Arc;

/// Tags allowed on one story
pub const MAX_TAGS_PER_STORY: usize = 10;
const MAX_TAG_LENGTH: usize = 32;

/// Error types for tag service operations
#[derive(Debug, thiserror::Error)]
pub enum TagServiceError {
    #[error("Tag not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub struct TagService {
    repo: Arc<dyn TagRepository>,
}

impl TagService {
    pub fn new(repo: Arc<dyn TagRepository>) -> Self {
        Self { repo }
    }

    /// Return the tag with this name's slug, creating it if needed
    pub async fn create_or_get(&self, name: &str) -> Result<Tag, TagServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(TagServiceError::ValidationError("Tag name cannot be empty".to_string()));
        }
        if name.chars().count() > MAX_TAG_LENGTH {
            return Err(TagServiceError::ValidationError(format!(
                "Tag '{}' is longer than {} characters",
                name, MAX_TAG_LENGTH
            )));
        }
        let slug = generate_slug(name);
        if slug.is_empty() {
            return Err(TagServiceError::ValidationError(format!(
                "Tag '{}' has no letters or digits",
                name
            )));
        }
        Ok(self
            .repo
            .get_or_create(&slug, name)
            .await
            .context("Failed to create tag")?)
    }

    /// Resolve the tag names of a story, dropping duplicates
    pub async fn resolve_names(&self, names: &[String]) -> Result<Vec<Tag>, TagServiceError> {
        let mut tags: Vec<Tag> = Vec::new();
        for name in names.iter().filter(|n| !n.trim().is_empty()) {
            let tag = self.create_or_get(name).await?;
            if !tags.iter().any(|t| t.id == tag.id) {
                tags.push(tag);
            }
        }
        if tags.len() > MAX_TAGS_PER_STORY {
            return Err(TagServiceError::ValidationError(format!(
                "A story can have at most {} tags",
                MAX_TAGS_PER_STORY
            )));
        }
        Ok(tags)
    }

    pub async fn get_by_slug(&self, slug: &str) -> Result<Option<Tag>, TagServiceError> {
        Ok(self.repo.get_by_slug(slug).await.context("Failed to get tag")?)
    }

    /// Most used tags on published stories
    pub async fn tag_cloud(&self, limit: i64) -> Result<Vec<TagWithCount>, TagServiceError> {
        Ok(self
            .repo
            .list_with_counts(limit.clamp(1, 200))
            .await
            .context("Failed to list tags")?)
    }

    pub async fn list_for_story(&self, story_id: i64) -> Result<Vec<Tag>, TagServiceError> {
        Ok(self
            .repo
            .list_for_story(story_id)
            .await
            .context("Failed to list story tags")?)
    }

    pub async fn delete(&self, slug: &str) -> Result<(), TagServiceError> {
        let tag = self
            .get_by_slug(slug)
            .await?
            .ok_or_else(|| TagServiceError::NotFound(slug.to_string()))?;
        self.repo.delete(tag.id).await.context("Failed to delete tag")?;
        tracing::info!("Deleted tag {}", tag.slug);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repositories::SqlxTagRepository;
    use crate::db::{create_test_pool, migrations};

    async fn setup() -> TagService {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        TagService::new(SqlxTagRepository::boxed(pool))
    }

    #[tokio::test]
    async fn test_create_or_get_reuses_by_slug() {
        let service = setup().await;
        let first = service.create_or_get("Peritoneal Dialysis").await.unwrap();
        let second = service.create_or_get("peritoneal  dialysis").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.slug, "peritoneal-dialysis");
    }

    #[tokio::test]
    async fn test_resolve_names() {
        let service = setup().await;
        let names = vec!["hope".to_string(), "Hope".to_string(), " ".to_string(), "diet".to_string()];
        let tags = service.resolve_names(&names).await.unwrap();
        assert_eq!(tags.len(), 2);

        let too_many: Vec<String> = (0..11).map(|i| format!("tag{}", i)).collect();
        assert!(matches!(
            service.resolve_names(&too_many).await,
            Err(TagServiceError::ValidationError(_))
        ));
        assert!(service.create_or_get("!!!").await.is_err());
    }

    #[tokio::test]
    async fn test_delete() {
        let service = setup().await;
        service.create_or_get("temporary").await.unwrap();
        service.delete("temporary").await.unwrap();
        assert!(service.get_by_slug("temporary").await.unwrap().is_none());
        assert!(matches!(service.delete("temporary").await, Err(TagServiceError::NotFound(_))));
    }
}
