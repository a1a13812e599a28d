//! Story service
//!
//! Writing, translating and moderating stories.
//!
//! Moderation follows `StoryStatus::can_transition_to`. Two transitions are
//! triggered by edits instead of by a moderator:
//! - editing a rejected story moves it back to draft
//! - an author (non-staff) editing a published story sends it back to review
//!
//! Published stories are cached per slug as a `StoryBundle` holding every
//! translation, so one cache entry serves all languages.

use anyhow::Context;
use futures::future;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, CacheLayer};
use crate::config::I18nConfig;
use crate::db::repositories::{CategoryRepository, StatusChange, StoryRepository, UserRepository};
use crate::models::{
    AccessLevel, Category, CreateStoryInput, ListParams, NewNotification, NewStory,
    NewStoryContent, NotificationKind, PagedResult, Permission, Story, StoryContent, StoryFilter,
    StoryStatus, StorySummary, StoryView, Tag, TranslationInput, UpdateStoryInput, User,
};
use crate::services::category::generate_slug;
use crate::services::markdown::MarkdownRenderer;
use crate::services::notification::NotificationService;
use crate::services::rate_limiter::{RateAction, RateLimited, RateLimiter};
use crate::services::tag::{TagService, TagServiceError};

const STORY_CACHE_TTL: Duration = Duration::from_secs(300);
const CACHE_KEY_STORY_BY_SLUG: &str = "story:slug:";
/// Every cached story page. Cached pages embed author and category names.
pub(crate) const STORY_CACHE_PATTERN: &str = "story:*";

const MAX_TITLE_LENGTH: usize = 200;
const MAX_SUMMARY_LENGTH: usize = 500;
const MAX_BODY_LENGTH: usize = 100_000;
const MAX_NOTE_LENGTH: usize = 1000;
const MAX_SLUG_LENGTH: usize = 80;

#[derive(Debug, thiserror::Error)]
pub enum StoryServiceError {
    #[error("Story not found")]
    NotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The viewer is below the story's access level
    #[error("This story is only available to {required} members")]
    AccessDenied { required: AccessLevel },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Cannot move a story from {from} to {to}")]
    InvalidTransition { from: StoryStatus, to: StoryStatus },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    RateLimited(#[from] RateLimited),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl From<TagServiceError> for StoryServiceError {
    fn from(err: TagServiceError) -> Self {
        match err {
            TagServiceError::ValidationError(msg) => StoryServiceError::ValidationError(msg),
            TagServiceError::NotFound(slug) => {
                StoryServiceError::ValidationError(format!("Unknown tag {}", slug))
            }
            TagServiceError::InternalError(e) => StoryServiceError::InternalError(e),
        }
    }
}

/// Everything needed to render a story in any language
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoryBundle {
    story: Story,
    contents: Vec<StoryContent>,
    author_name: String,
    author_avatar: String,
    translator_names: HashMap<i64, String>,
    category: Option<Category>,
    tags: Vec<Tag>,
}

pub struct StoryService {
    stories: Arc<dyn StoryRepository>,
    users: Arc<dyn UserRepository>,
    categories: Arc<dyn CategoryRepository>,
    tags: Arc<TagService>,
    notifications: Arc<NotificationService>,
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<Cache>,
    markdown: MarkdownRenderer,
    i18n: I18nConfig,
}

impl StoryService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stories: Arc<dyn StoryRepository>,
        users: Arc<dyn UserRepository>,
        categories: Arc<dyn CategoryRepository>,
        tags: Arc<TagService>,
        notifications: Arc<NotificationService>,
        rate_limiter: Arc<RateLimiter>,
        cache: Arc<Cache>,
        i18n: I18nConfig,
    ) -> Self {
        Self {
            stories,
            users,
            categories,
            tags,
            notifications,
            rate_limiter,
            cache,
            markdown: MarkdownRenderer::new(),
            i18n,
        }
    }

    // ========================================================================
    // Writing
    // ========================================================================

    /// Create a draft story with its first content
    pub async fn create(&self, author: &User, input: CreateStoryInput) -> Result<Story, StoryServiceError> {
        if !author.is_active() {
            return Err(StoryServiceError::Forbidden("Banned users cannot write stories".into()));
        }
        let language = match input.language.as_deref() {
            Some(language) if !language.trim().is_empty() => self.validate_language(language)?,
            _ => self.i18n.default_language.clone(),
        };
        let (title, summary, body) = validate_content(&input.title, input.summary.as_deref(), &input.body)?;
        if let Some(category_id) = input.category_id {
            self.ensure_category(category_id).await?;
        }
        let tags = self.tags.resolve_names(&input.tags).await?;
        let slug = self.unique_slug(&title).await?;

        let story = self
            .stories
            .create(&NewStory {
                author_id: author.id,
                category_id: input.category_id,
                slug,
                access_level: input.access_level,
                original_language: language.clone(),
                content: NewStoryContent {
                    language,
                    title,
                    summary,
                    body_html: self.markdown.render(&body),
                    body,
                    translator_id: None,
                },
            })
            .await
            .context("Failed to create story")?;

        if !tags.is_empty() {
            let tag_ids: Vec<i64> = tags.iter().map(|t| t.id).collect();
            self.stories
                .set_tags(story.id, &tag_ids)
                .await
                .context("Failed to set story tags")?;
        }

        tracing::info!("User {} created story {} ({})", author.username, story.id, story.slug);
        Ok(story)
    }

    /// Edit metadata and the original-language content
    pub async fn update(&self, actor: &User, id: i64, input: UpdateStoryInput) -> Result<Story, StoryServiceError> {
        let mut story = self.get_story(id).await?;
        let is_staff = actor.has_permission(Permission::ModerateStories);
        if !is_staff && !story.is_author(actor) {
            return Err(StoryServiceError::Forbidden("Only the author can edit this story".into()));
        }
        if input.is_featured.is_some() && !is_staff {
            return Err(StoryServiceError::Forbidden("Only moderators can feature stories".into()));
        }

        if input.title.is_some() || input.summary.is_some() || input.body.is_some() {
            let original = self
                .stories
                .get_content(story.id, &story.original_language)
                .await
                .context("Failed to load original content")?
                .ok_or_else(|| anyhow::anyhow!("Story {} has no original content", story.id))?;
            let (title, summary, body) = validate_content(
                input.title.as_deref().unwrap_or(&original.title),
                input.summary.as_deref().or(original.summary.as_deref()),
                input.body.as_deref().unwrap_or(&original.body),
            )?;
            self.stories
                .upsert_content(
                    story.id,
                    &NewStoryContent {
                        language: story.original_language.clone(),
                        title,
                        summary,
                        body_html: self.markdown.render(&body),
                        body,
                        translator_id: original.translator_id,
                    },
                )
                .await
                .context("Failed to update story content")?;
        }

        if let Some(category_id) = input.category_id {
            if let Some(category_id) = category_id {
                self.ensure_category(category_id).await?;
            }
            story.category_id = category_id;
        }
        if let Some(access_level) = input.access_level {
            story.access_level = access_level;
        }
        if let Some(is_featured) = input.is_featured {
            story.is_featured = is_featured;
        }
        self.stories
            .update_meta(&story)
            .await
            .context("Failed to update story")?;

        if let Some(names) = &input.tags {
            let tag_ids: Vec<i64> = self.tags.resolve_names(names).await?.iter().map(|t| t.id).collect();
            self.stories
                .set_tags(story.id, &tag_ids)
                .await
                .context("Failed to set story tags")?;
        }

        self.apply_edit_rules(actor, &story).await?;
        self.invalidate(&story.slug).await;
        self.get_story(id).await
    }

    /// Add or replace the content of a story in `language`.
    ///
    /// Any active member may translate a published story they can read. The
    /// author and moderators may edit every content.
    pub async fn upsert_translation(
        &self,
        actor: &User,
        id: i64,
        language: &str,
        input: TranslationInput,
    ) -> Result<StoryContent, StoryServiceError> {
        let language = self.validate_language(language)?;
        let story = self.get_story(id).await?;
        let is_author = story.is_author(actor);
        let is_staff = actor.has_permission(Permission::ModerateStories);

        if language == story.original_language {
            if !is_author && !is_staff {
                return Err(StoryServiceError::Forbidden(
                    "Only the author can edit the original text".into(),
                ));
            }
            self.update(
                actor,
                id,
                UpdateStoryInput {
                    title: Some(input.title),
                    summary: input.summary,
                    body: Some(input.body),
                    ..UpdateStoryInput::default()
                },
            )
            .await?;
            return self
                .stories
                .get_content(id, &language)
                .await
                .context("Failed to load content")?
                .ok_or(StoryServiceError::NotFound);
        }

        let existing = self
            .stories
            .get_content(id, &language)
            .await
            .context("Failed to load translation")?;
        if !is_author && !is_staff {
            if !actor.is_active() {
                return Err(StoryServiceError::Forbidden("Banned users cannot translate".into()));
            }
            if !story.is_published() || !story.access_level.permits(Some(actor)) {
                return Err(StoryServiceError::Forbidden(
                    "Only published stories you can read may be translated".into(),
                ));
            }
            if let Some(existing) = &existing {
                if existing.translator_id != Some(actor.id) {
                    return Err(StoryServiceError::Forbidden(
                        "This translation belongs to someone else".into(),
                    ));
                }
            }
        }

        let (title, summary, body) = validate_content(&input.title, input.summary.as_deref(), &input.body)?;
        let translator_id = match &existing {
            Some(existing) if existing.translator_id.is_some() && existing.translator_id != Some(actor.id) => {
                existing.translator_id
            }
            _ if is_author => None,
            _ => Some(actor.id),
        };
        let content = self
            .stories
            .upsert_content(
                id,
                &NewStoryContent {
                    language: language.clone(),
                    title,
                    summary,
                    body_html: self.markdown.render(&body),
                    body,
                    translator_id,
                },
            )
            .await
            .context("Failed to save translation")?;

        self.invalidate(&story.slug).await;
        tracing::info!("User {} translated story {} into {}", actor.username, id, language);

        if story.is_published() && !is_author && !is_staff {
            self.notify(
                NewNotification::new(
                    story.author_id,
                    NotificationKind::StoryTranslated,
                    "Your story was translated",
                    format!("{} translated your story into {}.", actor.public_name(), language),
                )
                .with_link(format!("{}?lang={}", story.path(), language)),
            )
            .await;
        }
        Ok(content)
    }

    /// Remove a translation. The original-language content always stays.
    pub async fn delete_translation(&self, actor: &User, id: i64, language: &str) -> Result<(), StoryServiceError> {
        let story = self.get_story(id).await?;
        let language = language.trim().to_lowercase();
        if language == story.original_language {
            return Err(StoryServiceError::ValidationError(
                "The original-language content cannot be deleted".into(),
            ));
        }
        let content = self
            .stories
            .get_content(id, &language)
            .await
            .context("Failed to load translation")?
            .ok_or(StoryServiceError::NotFound)?;

        let allowed = story.is_author(actor)
            || actor.has_permission(Permission::ModerateStories)
            || (actor.is_active() && content.translator_id == Some(actor.id));
        if !allowed {
            return Err(StoryServiceError::Forbidden("You cannot delete this translation".into()));
        }

        self.stories
            .delete_content(id, &language)
            .await
            .context("Failed to delete translation")?;
        self.invalidate(&story.slug).await;
        Ok(())
    }

    // ========================================================================
    // Moderation
    // ========================================================================

    /// Send a draft or rejected story to the moderators
    pub async fn submit_for_review(&self, actor: &User, id: i64) -> Result<Story, StoryServiceError> {
        let story = self.get_story(id).await?;
        if !story.is_author(actor) || !actor.is_active() {
            return Err(StoryServiceError::Forbidden("Only the author can submit this story".into()));
        }
        ensure_transition(story.status, StoryStatus::PendingReview)?;
        self.rate_limiter
            .hit(RateAction::StorySubmit, &actor.id.to_string())
            .await?;

        let story = self
            .transition(&story, StoryStatus::PendingReview, None, None)
            .await?;
        let title = self.title_of(&story).await;
        if let Err(e) = self
            .notifications
            .notify_staff(
                NewNotification::new(
                    0,
                    NotificationKind::StorySubmitted,
                    "A story is waiting for review",
                    format!("{} submitted \"{}\".", actor.public_name(), title),
                )
                .with_link("/moderation"),
                Some(actor.id),
            )
            .await
        {
            tracing::warn!("Failed to notify moderators: {}", e);
        }
        Ok(story)
    }

    pub async fn approve(&self, moderator: &User, id: i64) -> Result<Story, StoryServiceError> {
        require_moderator(moderator)?;
        let story = self.get_story(id).await?;
        let story = self
            .transition(&story, StoryStatus::Published, None, Some(moderator.id))
            .await?;
        tracing::info!("User {} approved story {}", moderator.username, story.id);

        let title = self.title_of(&story).await;
        self.notify(
            NewNotification::new(
                story.author_id,
                NotificationKind::StoryApproved,
                "Your story was published",
                format!("\"{}\" is now visible to the community.", title),
            )
            .with_link(story.path()),
        )
        .await;
        Ok(story)
    }

    /// Reject a story under review; the note tells the author why
    pub async fn reject(&self, moderator: &User, id: i64, note: &str) -> Result<Story, StoryServiceError> {
        require_moderator(moderator)?;
        let note = validate_note(note)?;
        let story = self.get_story(id).await?;
        let story = self
            .transition(&story, StoryStatus::Rejected, Some(note.clone()), Some(moderator.id))
            .await?;
        tracing::info!("User {} rejected story {}", moderator.username, story.id);

        let title = self.title_of(&story).await;
        self.notify(
            NewNotification::new(
                story.author_id,
                NotificationKind::StoryRejected,
                "Your story needs changes",
                format!("\"{}\" was not published: {}", title, note),
            )
            .with_link(format!("/stories/{}/edit", story.id)),
        )
        .await;
        Ok(story)
    }

    /// Take a published story back to draft
    pub async fn unpublish(&self, moderator: &User, id: i64, note: Option<&str>) -> Result<Story, StoryServiceError> {
        require_moderator(moderator)?;
        let note = match note.map(str::trim) {
            Some(note) if !note.is_empty() => Some(validate_note(note)?),
            _ => None,
        };
        let story = self.get_story(id).await?;
        let story = self
            .transition(&story, StoryStatus::Draft, note.clone(), Some(moderator.id))
            .await?;
        tracing::info!("User {} unpublished story {}", moderator.username, story.id);

        let title = self.title_of(&story).await;
        let message = match note {
            Some(note) => format!("\"{}\" was unpublished: {}", title, note),
            None => format!("\"{}\" was unpublished.", title),
        };
        self.notify(
            NewNotification::new(
                story.author_id,
                NotificationKind::StoryUnpublished,
                "Your story was unpublished",
                message,
            )
            .with_link(format!("/stories/{}/edit", story.id)),
        )
        .await;
        Ok(story)
    }

    /// Stories waiting for review, oldest first
    pub async fn moderation_queue(
        &self,
        moderator: &User,
        language: &str,
        params: &ListParams,
    ) -> Result<PagedResult<StorySummary>, StoryServiceError> {
        require_moderator(moderator)?;
        let filter = StoryFilter {
            status: Some(StoryStatus::PendingReview),
            ..StoryFilter::default()
        };
        self.list(&filter, language, params).await
    }

    // ========================================================================
    // Reading
    // ========================================================================

    /// A story as `viewer` may see it, in `language` when available.
    ///
    /// Unpublished stories are only visible to their author and to staff.
    pub async fn get_for_viewer(
        &self,
        slug: &str,
        language: &str,
        viewer: Option<&User>,
    ) -> Result<StoryView, StoryServiceError> {
        let bundle = self.load_bundle(slug).await?;
        let story = &bundle.story;
        let is_author = viewer.is_some_and(|v| story.is_author(v));
        let is_staff = viewer.is_some_and(|v| v.has_permission(Permission::ModerateStories));

        if !story.is_published() && !is_author && !is_staff {
            return Err(StoryServiceError::NotFound);
        }
        if !is_author && !story.access_level.permits(viewer) {
            return Err(StoryServiceError::AccessDenied {
                required: story.access_level,
            });
        }

        let content = bundle
            .contents
            .iter()
            .find(|c| c.language == language)
            .or_else(|| bundle.contents.iter().find(|c| c.language == story.original_language))
            .or_else(|| bundle.contents.first())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Story {} has no content", story.id))?;

        if story.is_published() && !is_author {
            if let Err(e) = self.stories.increment_views(story.id).await {
                tracing::warn!("Failed to count story view: {}", e);
            }
        }

        Ok(StoryView {
            is_fallback: content.language != language,
            available_languages: bundle.contents.iter().map(|c| c.language.clone()).collect(),
            translator_name: content
                .translator_id
                .and_then(|id| bundle.translator_names.get(&id).cloned()),
            author_name: bundle.author_name.clone(),
            author_avatar: bundle.author_avatar.clone(),
            category: bundle.category.clone(),
            tags: bundle.tags.clone(),
            story: bundle.story.clone(),
            content,
        })
    }

    /// Published stories `viewer` may read
    pub async fn list_published(
        &self,
        filter: StoryFilter,
        language: &str,
        viewer: Option<&User>,
        params: &ListParams,
    ) -> Result<PagedResult<StorySummary>, StoryServiceError> {
        let filter = StoryFilter {
            status: Some(StoryStatus::Published),
            access_levels: Some(AccessLevel::visible_to(viewer)),
            ..filter
        };
        self.list(&filter, language, params).await
    }

    /// Every story of one author, any status
    pub async fn list_by_author(
        &self,
        author_id: i64,
        language: &str,
        params: &ListParams,
    ) -> Result<PagedResult<StorySummary>, StoryServiceError> {
        let filter = StoryFilter {
            author_id: Some(author_id),
            ..StoryFilter::default()
        };
        self.list(&filter, language, params).await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<Story>, StoryServiceError> {
        Ok(self.stories.get_by_id(id).await.context("Failed to get story")?)
    }

    /// Contents of a story, original language first
    pub async fn list_contents(&self, id: i64) -> Result<Vec<StoryContent>, StoryServiceError> {
        Ok(self
            .stories
            .list_contents(id)
            .await
            .context("Failed to list story contents")?)
    }

    /// Delete a story. Authors may delete their stories while unpublished.
    pub async fn delete(&self, actor: &User, id: i64) -> Result<(), StoryServiceError> {
        let story = self.get_story(id).await?;
        let is_staff = actor.has_permission(Permission::ModerateStories);
        if !is_staff && !(story.is_author(actor) && !story.is_published()) {
            return Err(StoryServiceError::Forbidden(
                "Published stories can only be deleted by moderators".into(),
            ));
        }
        self.stories.delete(id).await.context("Failed to delete story")?;
        self.invalidate(&story.slug).await;
        tracing::info!("User {} deleted story {} ({})", actor.username, id, story.slug);
        Ok(())
    }

    // ========================================================================
    // Private helper methods
    // ========================================================================

    async fn list(
        &self,
        filter: &StoryFilter,
        language: &str,
        params: &ListParams,
    ) -> Result<PagedResult<StorySummary>, StoryServiceError> {
        let (items, total) = self
            .stories
            .list(filter, language, params)
            .await
            .context("Failed to list stories")?;
        Ok(PagedResult::new(items, total, params))
    }

    async fn get_story(&self, id: i64) -> Result<Story, StoryServiceError> {
        self.stories
            .get_by_id(id)
            .await
            .context("Failed to get story")?
            .ok_or(StoryServiceError::NotFound)
    }

    async fn load_bundle(&self, slug: &str) -> Result<StoryBundle, StoryServiceError> {
        let key = format!("{}{}", CACHE_KEY_STORY_BY_SLUG, slug);
        if let Ok(Some(bundle)) = self.cache.get::<StoryBundle>(&key).await {
            return Ok(bundle);
        }

        let story = self
            .stories
            .get_by_slug(slug)
            .await
            .context("Failed to get story")?
            .ok_or(StoryServiceError::NotFound)?;
        let contents = self
            .stories
            .list_contents(story.id)
            .await
            .context("Failed to list story contents")?;

        let (author_name, author_avatar) = match self
            .users
            .get_by_id(story.author_id)
            .await
            .context("Failed to load author")?
        {
            Some(author) => (author.public_name().to_string(), author.avatar_url()),
            None => (String::new(), String::new()),
        };

        let mut translator_ids: Vec<i64> = contents.iter().filter_map(|c| c.translator_id).collect();
        translator_ids.sort_unstable();
        translator_ids.dedup();
        let translators = future::try_join_all(translator_ids.iter().map(|id| self.users.get_by_id(*id)))
            .await
            .context("Failed to load translators")?;
        let translator_names: HashMap<i64, String> = translators
            .into_iter()
            .flatten()
            .map(|user| (user.id, user.public_name().to_string()))
            .collect();

        let category = match story.category_id {
            Some(id) => self.categories.get_by_id(id).await.context("Failed to load category")?,
            None => None,
        };
        let tags = self.tags.list_for_story(story.id).await?;

        let bundle = StoryBundle {
            story,
            contents,
            author_name,
            author_avatar,
            translator_names,
            category,
            tags,
        };
        if bundle.story.is_published() {
            if let Err(e) = self.cache.set(&key, &bundle, STORY_CACHE_TTL).await {
                tracing::warn!("Failed to cache story {}: {}", slug, e);
            }
        }
        Ok(bundle)
    }

    async fn invalidate(&self, slug: &str) {
        let key = format!("{}{}", CACHE_KEY_STORY_BY_SLUG, slug);
        if let Err(e) = self.cache.delete(&key).await {
            tracing::warn!("Failed to invalidate story cache: {}", e);
        }
    }

    /// Status changes caused by editing
    async fn apply_edit_rules(&self, actor: &User, story: &Story) -> Result<(), StoryServiceError> {
        let next = match story.status {
            StoryStatus::Rejected => Some(StoryStatus::Draft),
            StoryStatus::Published
                if story.is_author(actor) && !actor.has_permission(Permission::ModerateStories) =>
            {
                Some(StoryStatus::PendingReview)
            }
            _ => None,
        };
        if let Some(next) = next {
            let change = StatusChange {
                from: story.status,
                to: next,
                moderation_note: story.moderation_note.clone(),
                moderated_by: None,
            };
            self.stories
                .update_status(story.id, &change)
                .await
                .context("Failed to update story status")?;
            tracing::info!("Story {} moved from {} to {} after an edit", story.id, story.status, next);
        }
        Ok(())
    }

    async fn transition(
        &self,
        story: &Story,
        to: StoryStatus,
        moderation_note: Option<String>,
        moderated_by: Option<i64>,
    ) -> Result<Story, StoryServiceError> {
        ensure_transition(story.status, to)?;
        let change = StatusChange {
            from: story.status,
            to,
            moderation_note,
            moderated_by,
        };
        let updated = self
            .stories
            .update_status(story.id, &change)
            .await
            .context("Failed to update story status")?;
        if !updated {
            return Err(StoryServiceError::Conflict(
                "The story was changed by someone else, reload and try again".into(),
            ));
        }
        self.invalidate(&story.slug).await;
        self.get_story(story.id).await
    }

    async fn unique_slug(&self, title: &str) -> Result<String, StoryServiceError> {
        let mut base: String = generate_slug(title).chars().take(MAX_SLUG_LENGTH).collect();
        base = base.trim_end_matches('-').to_string();
        if base.is_empty() {
            base = "story".to_string();
        }

        let mut candidate = base.clone();
        for n in 2..=50 {
            if !self
                .stories
                .slug_exists(&candidate)
                .await
                .context("Failed to check slug")?
            {
                return Ok(candidate);
            }
            candidate = format!("{}-{}", base, n);
        }
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Ok(format!("{}-{}", base, &suffix[..8]))
    }

    async fn ensure_category(&self, id: i64) -> Result<(), StoryServiceError> {
        if self
            .categories
            .get_by_id(id)
            .await
            .context("Failed to load category")?
            .is_none()
        {
            return Err(StoryServiceError::ValidationError(format!("Unknown category {}", id)));
        }
        Ok(())
    }

    fn validate_language(&self, language: &str) -> Result<String, StoryServiceError> {
        let language = language.trim().to_lowercase();
        if !self.i18n.is_supported(&language) {
            return Err(StoryServiceError::ValidationError(format!(
                "Unsupported language '{}'",
                language
            )));
        }
        Ok(language)
    }

    async fn title_of(&self, story: &Story) -> String {
        match self.stories.get_content(story.id, &story.original_language).await {
            Ok(Some(content)) => content.title,
            _ => story.slug.clone(),
        }
    }

    async fn notify(&self, notification: NewNotification) {
        if let Err(e) = self.notifications.notify(notification).await {
            tracing::warn!("Failed to send notification: {}", e);
        }
    }
}

fn ensure_transition(from: StoryStatus, to: StoryStatus) -> Result<(), StoryServiceError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(StoryServiceError::InvalidTransition { from, to })
    }
}

fn require_moderator(user: &User) -> Result<(), StoryServiceError> {
    if user.has_permission(Permission::ModerateStories) {
        Ok(())
    } else {
        Err(StoryServiceError::Forbidden("Moderator permission required".into()))
    }
}

fn validate_note(note: &str) -> Result<String, StoryServiceError> {
    let note = note.trim();
    if note.is_empty() {
        return Err(StoryServiceError::ValidationError("A moderation note is required".into()));
    }
    if note.chars().count() > MAX_NOTE_LENGTH {
        return Err(StoryServiceError::ValidationError(format!(
            "Moderation note cannot exceed {} characters",
            MAX_NOTE_LENGTH
        )));
    }
    Ok(note.to_string())
}

/// Trimmed title, summary and body, or the first problem found
fn validate_content(
    title: &str,
    summary: Option<&str>,
    body: &str,
) -> Result<(String, Option<String>, String), StoryServiceError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(StoryServiceError::ValidationError("Title cannot be empty".into()));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(StoryServiceError::ValidationError(format!(
            "Title cannot exceed {} characters",
            MAX_TITLE_LENGTH
        )));
    }
    let summary = summary.map(str::trim).filter(|s| !s.is_empty());
    if summary.is_some_and(|s| s.chars().count() > MAX_SUMMARY_LENGTH) {
        return Err(StoryServiceError::ValidationError(format!(
            "Summary cannot exceed {} characters",
            MAX_SUMMARY_LENGTH
        )));
    }
    let body = body.trim();
    if body.is_empty() {
        return Err(StoryServiceError::ValidationError("Story text cannot be empty".into()));
    }
    if body.chars().count() > MAX_BODY_LENGTH {
        return Err(StoryServiceError::ValidationError(format!(
            "Story text cannot exceed {} characters",
            MAX_BODY_LENGTH
        )));
    }
    Ok((title.to_string(), summary.map(str::to_string), body.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::db::repositories::{
        NotificationRepository, SqlxCategoryRepository, SqlxLoginLogRepository,
        SqlxNotificationRepository, SqlxSessionRepository, SqlxStoryRepository, SqlxTagRepository,
        SqlxUserRepository,
    };
    use crate::db::{create_test_pool, migrations, DynDatabasePool};
    use crate::models::{
        CreateCategoryInput, CreateUserInput, UpdateCategoryInput, UpdateProfileInput, UserRole,
    };
    use crate::services::{CategoryService, UserService};

    struct Fixture {
        pool: DynDatabasePool,
        cache: Arc<MemoryCache>,
        service: StoryService,
        admin: User,
        moderator: User,
        author: User,
        reader: User,
    }

    async fn setup() -> Fixture {
        let pool = create_test_pool().await.unwrap();
        migrations::run_migrations(&pool).await.unwrap();
        let users = SqlxUserRepository::boxed(pool.clone());

        let mut created = Vec::new();
        for (name, role) in [
            ("admin", UserRole::Admin),
            ("moderator", UserRole::Moderator),
            ("author", UserRole::Member),
            ("reader", UserRole::Member),
        ] {
            created.push(
                users
                    .create(&CreateUserInput {
                        username: name.into(),
                        email: format!("{}@example.com", name),
                        password_hash: "h".into(),
                        role,
                        preferred_language: None,
                    })
                    .await
                    .unwrap(),
            );
        }

        let notifications = Arc::new(NotificationService::new(
            SqlxNotificationRepository::boxed(pool.clone()),
            users.clone(),
        ));
        let cache = Arc::new(MemoryCache::new());
        let service = StoryService::new(
            SqlxStoryRepository::boxed(pool.clone()),
            users,
            SqlxCategoryRepository::boxed(pool.clone()),
            Arc::new(TagService::new(SqlxTagRepository::boxed(pool.clone()))),
            notifications,
            Arc::new(RateLimiter::default()),
            cache.clone(),
            I18nConfig::default(),
        );

        let mut created = created.into_iter();
        Fixture {
            pool,
            cache,
            service,
            admin: created.next().unwrap(),
            moderator: created.next().unwrap(),
            author: created.next().unwrap(),
            reader: created.next().unwrap(),
        }
    }

    fn story_input(title: &str) -> CreateStoryInput {
        CreateStoryInput {
            title: title.into(),
            summary: Some("How I found my way".into()),
            body: "I was diagnosed in **2015**.".into(),
            language: Some("en".into()),
            category_id: None,
            access_level: AccessLevel::Public,
            tags: vec!["Hope".into(), "Dialysis".into()],
        }
    }

    async fn published(f: &Fixture, title: &str) -> Story {
        let story = f.service.create(&f.author, story_input(title)).await.unwrap();
        f.service.submit_for_review(&f.author, story.id).await.unwrap();
        f.service.approve(&f.moderator, story.id).await.unwrap()
    }

    async fn unread(f: &Fixture, user: &User) -> i64 {
        SqlxNotificationRepository::new(f.pool.clone())
            .unread_count(user.id)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_cached_page_follows_author_and_category_changes() {
        let f = setup().await;
        let categories = CategoryService::new(SqlxCategoryRepository::boxed(f.pool.clone()), f.cache.clone());
        let users = UserService::new(
            SqlxUserRepository::boxed(f.pool.clone()),
            SqlxSessionRepository::boxed(f.pool.clone()),
            SqlxLoginLogRepository::boxed(f.pool.clone()),
            Arc::new(RateLimiter::default()),
        )
        .with_cache(f.cache.clone());

        let category = categories
            .create(CreateCategoryInput {
                name: "Home Dialysis".into(),
                slug: None,
                description: None,
                sort_order: 0,
            })
            .await
            .unwrap();
        let mut input = story_input("Waiting for a kidney");
        input.category_id = Some(category.id);
        let story = f.service.create(&f.author, input).await.unwrap();
        f.service.submit_for_review(&f.author, story.id).await.unwrap();
        let story = f.service.approve(&f.moderator, story.id).await.unwrap();

        let view = f.service.get_for_viewer(&story.slug, "en", None).await.unwrap();
        assert_eq!(view.author_name, "author");
        assert_eq!(view.category.map(|c| c.name).as_deref(), Some("Home Dialysis"));

        users
            .update_profile(
                f.author.id,
                UpdateProfileInput {
                    display_name: Some("Marta R.".into()),
                    ..UpdateProfileInput::default()
                },
            )
            .await
            .unwrap();
        categories
            .update(
                category.id,
                UpdateCategoryInput {
                    name: Some("Dialysis at Home".into()),
                    ..UpdateCategoryInput::default()
                },
            )
            .await
            .unwrap();
        let view = f.service.get_for_viewer(&story.slug, "en", None).await.unwrap();
        assert_eq!(view.author_name, "Marta R.");
        assert_eq!(view.category.map(|c| c.name).as_deref(), Some("Dialysis at Home"));

        categories.delete(category.id).await.unwrap();
        let view = f.service.get_for_viewer(&story.slug, "en", None).await.unwrap();
        assert!(view.category.is_none());
    }

    #[tokio::test]
    async fn test_create_draft_with_unique_slug() {
        let f = setup().await;
        let first = f.service.create(&f.author, story_input("My Journey")).await.unwrap();
        let second = f.service.create(&f.author, story_input("My journey!")).await.unwrap();

        assert_eq!(first.status, StoryStatus::Draft);
        assert_eq!(first.slug, "my-journey");
        assert_eq!(second.slug, "my-journey-2");
        assert_eq!(first.original_language, "en");

        let contents = f.service.list_contents(first.id).await.unwrap();
        assert_eq!(contents.len(), 1);
        assert!(contents[0].body_html.contains("<strong>2015</strong>"));
    }

    #[tokio::test]
    async fn test_create_validation() {
        let f = setup().await;
        let mut input = story_input("Title");
        input.language = Some("xx".into());
        assert!(matches!(
            f.service.create(&f.author, input).await,
            Err(StoryServiceError::ValidationError(_))
        ));

        let mut input = story_input("   ");
        input.language = None;
        assert!(matches!(
            f.service.create(&f.author, input).await,
            Err(StoryServiceError::ValidationError(_))
        ));

        let mut input = story_input("Title");
        input.category_id = Some(9999);
        assert!(matches!(
            f.service.create(&f.author, input).await,
            Err(StoryServiceError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn test_moderation_workflow() {
        let f = setup().await;
        let story = f.service.create(&f.author, story_input("Workflow")).await.unwrap();

        // Drafts cannot be approved
        assert!(matches!(
            f.service.approve(&f.moderator, story.id).await,
            Err(StoryServiceError::InvalidTransition { .. })
        ));
        assert!(matches!(
            f.service.submit_for_review(&f.reader, story.id).await,
            Err(StoryServiceError::Forbidden(_))
        ));

        let pending = f.service.submit_for_review(&f.author, story.id).await.unwrap();
        assert_eq!(pending.status, StoryStatus::PendingReview);
        // Both staff members hear about it
        assert_eq!(unread(&f, &f.moderator).await, 1);
        assert_eq!(unread(&f, &f.admin).await, 1);

        assert!(matches!(
            f.service.approve(&f.reader, story.id).await,
            Err(StoryServiceError::Forbidden(_))
        ));
        assert!(matches!(
            f.service.reject(&f.moderator, story.id, "  ").await,
            Err(StoryServiceError::ValidationError(_))
        ));

        let rejected = f.service.reject(&f.moderator, story.id, "Please remove names").await.unwrap();
        assert_eq!(rejected.status, StoryStatus::Rejected);
        assert_eq!(rejected.moderation_note.as_deref(), Some("Please remove names"));
        assert_eq!(rejected.moderated_by, Some(f.moderator.id));

        f.service.submit_for_review(&f.author, story.id).await.unwrap();
        let approved = f.service.approve(&f.admin, story.id).await.unwrap();
        assert_eq!(approved.status, StoryStatus::Published);
        assert!(approved.published_at.is_some());
        assert!(approved.moderation_note.is_none());
        assert_eq!(unread(&f, &f.author).await, 2);

        let draft = f.service.unpublish(&f.moderator, story.id, None).await.unwrap();
        assert_eq!(draft.status, StoryStatus::Draft);
    }

    #[tokio::test]
    async fn test_edit_rules() {
        let f = setup().await;
        let story = published(&f, "Edits").await;

        // Moderator edits keep the story published
        let edited = f
            .service
            .update(
                &f.moderator,
                story.id,
                UpdateStoryInput {
                    is_featured: Some(true),
                    ..UpdateStoryInput::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.status, StoryStatus::Published);
        assert!(edited.is_featured);

        let edited = f
            .service
            .update(
                &f.author,
                story.id,
                UpdateStoryInput {
                    body: Some("Updated text".into()),
                    ..UpdateStoryInput::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.status, StoryStatus::PendingReview);

        f.service.reject(&f.moderator, story.id, "Too short").await.unwrap();
        let edited = f
            .service
            .update(
                &f.author,
                story.id,
                UpdateStoryInput {
                    title: Some("Edits, longer".into()),
                    ..UpdateStoryInput::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(edited.status, StoryStatus::Draft);

        assert!(matches!(
            f.service
                .update(
                    &f.author,
                    story.id,
                    UpdateStoryInput {
                        is_featured: Some(true),
                        ..UpdateStoryInput::default()
                    },
                )
                .await,
            Err(StoryServiceError::Forbidden(_))
        ));
        assert!(matches!(
            f.service.update(&f.reader, story.id, UpdateStoryInput::default()).await,
            Err(StoryServiceError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_translation_and_language_fallback() {
        let f = setup().await;
        let story = published(&f, "Translated").await;

        let content = f
            .service
            .upsert_translation(
                &f.reader,
                story.id,
                "es",
                TranslationInput {
                    title: "Traducida".into(),
                    summary: None,
                    body: "Me diagnosticaron en 2015.".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(content.translator_id, Some(f.reader.id));
        // Author was told about the approval and the translation
        assert_eq!(unread(&f, &f.author).await, 2);

        let view = f.service.get_for_viewer("translated", "es", None).await.unwrap();
        assert_eq!(view.content.title, "Traducida");
        assert!(!view.is_fallback);
        assert_eq!(view.translator_name.as_deref(), Some("reader"));
        assert_eq!(view.available_languages, vec!["en".to_string(), "es".to_string()]);

        let view = f.service.get_for_viewer("translated", "fr", None).await.unwrap();
        assert_eq!(view.content.language, "en");
        assert!(view.is_fallback);

        // Staff translations are credited without notifying the author
        let german = f
            .service
            .upsert_translation(
                &f.admin,
                story.id,
                "de",
                TranslationInput {
                    title: "Übersetzt".into(),
                    summary: None,
                    body: "Text".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(german.translator_id, Some(f.admin.id));
        assert_eq!(unread(&f, &f.author).await, 2);
        let other = f
            .service
            .upsert_translation(
                &f.author,
                story.id,
                "es",
                TranslationInput {
                    title: "Traducida por la autora".into(),
                    summary: None,
                    body: "Texto".into(),
                },
            )
            .await
            .unwrap();
        // The author may edit, the credit stays with the translator
        assert_eq!(other.translator_id, Some(f.reader.id));
    }

    #[tokio::test]
    async fn test_translation_rules() {
        let f = setup().await;
        let story = f.service.create(&f.author, story_input("Draft only")).await.unwrap();
        let input = TranslationInput {
            title: "Borrador".into(),
            summary: None,
            body: "Texto".into(),
        };

        assert!(matches!(
            f.service.upsert_translation(&f.reader, story.id, "es", input.clone()).await,
            Err(StoryServiceError::Forbidden(_))
        ));
        assert!(matches!(
            f.service.upsert_translation(&f.author, story.id, "xx", input.clone()).await,
            Err(StoryServiceError::ValidationError(_))
        ));

        f.service.upsert_translation(&f.author, story.id, "es", input).await.unwrap();
        assert!(matches!(
            f.service.delete_translation(&f.author, story.id, "en").await,
            Err(StoryServiceError::ValidationError(_))
        ));
        assert!(matches!(
            f.service.delete_translation(&f.reader, story.id, "es").await,
            Err(StoryServiceError::Forbidden(_))
        ));
        f.service.delete_translation(&f.author, story.id, "es").await.unwrap();
        assert!(matches!(
            f.service.delete_translation(&f.author, story.id, "es").await,
            Err(StoryServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_visibility_and_access_levels() {
        let f = setup().await;
        let draft = f.service.create(&f.author, story_input("Hidden")).await.unwrap();
        assert!(matches!(
            f.service.get_for_viewer(&draft.slug, "en", Some(&f.reader)).await,
            Err(StoryServiceError::NotFound)
        ));
        assert!(f.service.get_for_viewer(&draft.slug, "en", Some(&f.author)).await.is_ok());
        assert!(f.service.get_for_viewer(&draft.slug, "en", Some(&f.moderator)).await.is_ok());

        let mut input = story_input("Verified only");
        input.access_level = AccessLevel::Verified;
        let story = f.service.create(&f.author, input).await.unwrap();
        f.service.submit_for_review(&f.author, story.id).await.unwrap();
        f.service.approve(&f.moderator, story.id).await.unwrap();

        assert!(matches!(
            f.service.get_for_viewer(&story.slug, "en", None).await,
            Err(StoryServiceError::AccessDenied { required: AccessLevel::Verified })
        ));
        assert!(matches!(
            f.service.get_for_viewer(&story.slug, "en", Some(&f.reader)).await,
            Err(StoryServiceError::AccessDenied { .. })
        ));
        let mut verified = f.reader.clone();
        verified.is_verified = true;
        assert!(f.service.get_for_viewer(&story.slug, "en", Some(&verified)).await.is_ok());

        let anonymous = f
            .service
            .list_published(StoryFilter::default(), "en", None, &ListParams::default())
            .await
            .unwrap();
        assert_eq!(anonymous.total, 0);
        let listed = f
            .service
            .list_published(StoryFilter::default(), "en", Some(&verified), &ListParams::default())
            .await
            .unwrap();
        assert_eq!(listed.total, 1);
    }

    #[tokio::test]
    async fn test_views_counted_for_readers() {
        let f = setup().await;
        let story = published(&f, "Counted").await;
        f.service.get_for_viewer(&story.slug, "en", None).await.unwrap();
        f.service.get_for_viewer(&story.slug, "en", Some(&f.reader)).await.unwrap();
        f.service.get_for_viewer(&story.slug, "en", Some(&f.author)).await.unwrap();

        let story = f.service.get_by_id(story.id).await.unwrap().unwrap();
        assert_eq!(story.view_count, 2);
    }

    #[tokio::test]
    async fn test_lists_and_delete() {
        let f = setup().await;
        let draft = f.service.create(&f.author, story_input("Mine")).await.unwrap();
        let live = published(&f, "Live").await;
        let pending = f.service.create(&f.author, story_input("Waiting")).await.unwrap();
        f.service.submit_for_review(&f.author, pending.id).await.unwrap();

        let mine = f
            .service
            .list_by_author(f.author.id, "en", &ListParams::default())
            .await
            .unwrap();
        assert_eq!(mine.total, 3);

        let queue = f
            .service
            .moderation_queue(&f.moderator, "en", &ListParams::default())
            .await
            .unwrap();
        assert_eq!(queue.total, 1);
        assert_eq!(queue.items[0].id, pending.id);
        assert!(f
            .service
            .moderation_queue(&f.reader, "en", &ListParams::default())
            .await
            .is_err());

        assert!(matches!(
            f.service.delete(&f.author, live.id).await,
            Err(StoryServiceError::Forbidden(_))
        ));
        f.service.delete(&f.author, draft.id).await.unwrap();
        f.service.delete(&f.moderator, live.id).await.unwrap();
        assert!(matches!(
            f.service.get_for_viewer(&live.slug, "en", None).await,
            Err(StoryServiceError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_submit_rate_limited() {
        let f = setup().await;
        let config = crate::config::SecurityConfig {
            story_submit: crate::config::RateLimitRule::new(1, 3600),
            ..crate::config::SecurityConfig::default()
        };
        let service = StoryService {
            rate_limiter: Arc::new(RateLimiter::new(&config)),
            ..f.service
        };
        let first = service.create(&f.author, story_input("One")).await.unwrap();
        let second = service.create(&f.author, story_input("Two")).await.unwrap();
        service.submit_for_review(&f.author, first.id).await.unwrap();
        assert!(matches!(
            service.submit_for_review(&f.author, second.id).await,
            Err(StoryServiceError::RateLimited(_))
        ));
    }
}
