//! Story model
//!
//! A story is language-neutral metadata (author, status, access level) plus
//! one `StoryContent` row per language it has been written or translated in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{Category, Tag, User};

/// Story metadata shared by all translations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: i64,
    pub author_id: i64,
    pub category_id: Option<i64>,
    /// URL slug (unique)
    pub slug: String,
    pub status: StoryStatus,
    pub access_level: AccessLevel,
    /// Language the author wrote the story in; its content cannot be removed
    pub original_language: String,
    pub is_featured: bool,
    pub view_count: i64,
    /// Reason given by a moderator on rejection
    pub moderation_note: Option<String>,
    pub moderated_by: Option<i64>,
    pub moderated_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Story {
    pub fn is_published(&self) -> bool {
        self.status == StoryStatus::Published
    }

    pub fn is_author(&self, user: &User) -> bool {
        self.author_id == user.id
    }

    /// Page path of the story; slugs may hold non-ASCII letters
    pub fn path(&self) -> String {
        story_path(&self.slug)
    }
}

/// `/stories/{slug}` with the slug percent-encoded
pub fn story_path(slug: &str) -> String {
    format!("/stories/{}", urlencoding::encode(slug))
}

/// One translation of a story
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryContent {
    pub id: i64,
    pub story_id: i64,
    pub language: String,
    pub title: String,
    pub summary: Option<String>,
    /// Markdown source
    pub body: String,
    /// Rendered, escaped HTML
    pub body_html: String,
    /// Set when someone other than the author translated this content
    pub translator_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Moderation workflow state.
///
/// ```text
/// draft -> pending_review -> published
///   ^          |    \
///   |          v     -> rejected -> draft | pending_review
///   +------- draft
/// published -> draft (unpublish)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    #[default]
    Draft,
    PendingReview,
    Published,
    Rejected,
}

impl StoryStatus {
    pub const ALL: [StoryStatus; 4] = [
        StoryStatus::Draft,
        StoryStatus::PendingReview,
        StoryStatus::Published,
        StoryStatus::Rejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::Draft => "draft",
            StoryStatus::PendingReview => "pending_review",
            StoryStatus::Published => "published",
            StoryStatus::Rejected => "rejected",
        }
    }

    /// Whether the workflow allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: StoryStatus) -> bool {
        use StoryStatus::*;
        matches!(
            (self, next),
            (Draft, PendingReview)
                | (PendingReview, Published)
                | (PendingReview, Rejected)
                | (PendingReview, Draft)
                | (Rejected, Draft)
                | (Rejected, PendingReview)
                | (Published, Draft)
        )
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoryStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(StoryStatus::Draft),
            "pending_review" => Ok(StoryStatus::PendingReview),
            "published" => Ok(StoryStatus::Published),
            "rejected" => Ok(StoryStatus::Rejected),
            _ => Err(anyhow::anyhow!("Invalid story status: {}", s)),
        }
    }
}

/// Who may read a published story
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessLevel {
    #[default]
    Public,
    Registered,
    Verified,
    Premium,
}

impl AccessLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::Public => "public",
            AccessLevel::Registered => "registered",
            AccessLevel::Verified => "verified",
            AccessLevel::Premium => "premium",
        }
    }

    /// Whether `viewer` may read content at this level.
    ///
    /// Staff pass every level. Authorship is checked by the caller.
    pub fn permits(&self, viewer: Option<&User>) -> bool {
        let viewer = match viewer {
            Some(user) if user.is_active() => user,
            _ => return *self == AccessLevel::Public,
        };
        if viewer.is_staff() {
            return true;
        }
        match self {
            AccessLevel::Public | AccessLevel::Registered => true,
            AccessLevel::Verified => viewer.is_verified,
            AccessLevel::Premium => viewer.is_premium,
        }
    }

    /// Every level `viewer` may read, used to filter listings
    pub fn visible_to(viewer: Option<&User>) -> Vec<AccessLevel> {
        [
            AccessLevel::Public,
            AccessLevel::Registered,
            AccessLevel::Verified,
            AccessLevel::Premium,
        ]
        .into_iter()
        .filter(|level| level.permits(viewer))
        .collect()
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(AccessLevel::Public),
            "registered" => Ok(AccessLevel::Registered),
            "verified" => Ok(AccessLevel::Verified),
            "premium" => Ok(AccessLevel::Premium),
            _ => Err(anyhow::anyhow!("Invalid access level: {}", s)),
        }
    }
}

/// Row data for a new story and its first content
#[derive(Debug, Clone)]
pub struct NewStory {
    pub author_id: i64,
    pub category_id: Option<i64>,
    pub slug: String,
    pub access_level: AccessLevel,
    pub original_language: String,
    pub content: NewStoryContent,
}

/// Row data for a story content (insert or replace)
#[derive(Debug, Clone)]
pub struct NewStoryContent {
    pub language: String,
    pub title: String,
    pub summary: Option<String>,
    pub body: String,
    pub body_html: String,
    pub translator_id: Option<i64>,
}

/// Input for creating a story
#[derive(Debug, Clone, Deserialize)]
pub struct CreateStoryInput {
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub body: String,
    /// Defaults to the site's default language
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub category_id: Option<i64>,
    #[serde(default)]
    pub access_level: AccessLevel,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Input for updating story metadata and its original-language content
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateStoryInput {
    pub title: Option<String>,
    pub summary: Option<String>,
    pub body: Option<String>,
    /// `Some(None)` clears the category
    #[serde(default, with = "double_option")]
    pub category_id: Option<Option<i64>>,
    pub access_level: Option<AccessLevel>,
    pub tags: Option<Vec<String>>,
    /// Only honoured for staff
    pub is_featured: Option<bool>,
}

/// Input for adding or editing a translation
#[derive(Debug, Clone, Deserialize)]
pub struct TranslationInput {
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub body: String,
}

/// Story listing filters
#[derive(Debug, Clone, Default)]
pub struct StoryFilter {
    pub status: Option<StoryStatus>,
    pub author_id: Option<i64>,
    pub category_id: Option<i64>,
    pub tag_slug: Option<String>,
    /// Only stories that have content in this language
    pub language: Option<String>,
    /// Restrict to these access levels; `None` means no restriction
    pub access_levels: Option<Vec<AccessLevel>>,
    pub featured_only: bool,
}

/// A story rendered for one reader in one language
#[derive(Debug, Clone, Serialize)]
pub struct StoryView {
    pub story: Story,
    pub content: StoryContent,
    /// True when the requested language was not available
    pub is_fallback: bool,
    pub available_languages: Vec<String>,
    pub author_name: String,
    pub author_avatar: String,
    pub translator_name: Option<String>,
    pub category: Option<Category>,
    pub tags: Vec<Tag>,
}

/// A row for story lists
#[derive(Debug, Clone, Serialize)]
pub struct StorySummary {
    pub id: i64,
    pub slug: String,
    pub status: StoryStatus,
    pub access_level: AccessLevel,
    pub language: String,
    pub title: String,
    pub summary: Option<String>,
    pub author_id: i64,
    pub author_name: String,
    pub view_count: i64,
    pub is_featured: bool,
    pub moderation_note: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Serde helper distinguishing a missing field from an explicit `null`
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}
