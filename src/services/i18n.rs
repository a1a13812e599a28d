//! Interface translations
//!
//! Strings live in the `translations` table. A lookup falls back from the
//! requested language to the default language, then to the built-in English
//! messages, then to the key itself.

use anyhow::Context;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Cache, CacheLayer};
use crate::config::I18nConfig;
use crate::db::repositories::TranslationRepository;
use crate::models::{LanguageCoverage, Translation, User};

const CACHE_PREFIX: &str = "i18n:";
const CACHE_TTL: Duration = Duration::from_secs(600);
const MAX_KEY_LENGTH: usize = 128;
const MAX_VALUE_LENGTH: usize = 2000;

/// Built-in English interface strings
pub const DEFAULT_MESSAGES: &[(&str, &str)] = &[
    ("nav.home", "Home"),
    ("nav.write", "Write"),
    ("nav.login", "Log in"),
    ("nav.register", "Sign up"),
    ("nav.logout", "Log out"),
    ("nav.profile", "Profile"),
    ("nav.my_stories", "My stories"),
    ("nav.notifications", "Notifications"),
    ("nav.moderation", "Moderation"),
    ("nav.admin", "Admin"),
    ("home.title", "Stories from our community"),
    ("home.empty", "No stories yet. Be the first to share yours."),
    ("home.all_categories", "All categories"),
    ("story.read_more", "Read more"),
    ("story.comments", "Comments"),
    ("story.translate", "Translate this story"),
    ("story.translated_by", "Translated by"),
    ("story.fallback", "This story is not yet available in your language."),
    ("story.views", "views"),
    ("story.edit", "Edit"),
    ("story.delete", "Delete"),
    ("story.submit", "Submit for review"),
    ("story.status.draft", "Draft"),
    ("story.status.pending_review", "Waiting for review"),
    ("story.status.published", "Published"),
    ("story.status.rejected", "Needs changes"),
    ("form.title", "Title"),
    ("form.summary", "Summary"),
    ("form.body", "Your story"),
    ("form.language", "Language"),
    ("form.category", "Category"),
    ("form.access_level", "Who can read it"),
    ("form.tags", "Tags"),
    ("form.save", "Save"),
    ("form.username", "Username"),
    ("form.email", "E-mail"),
    ("form.password", "Password"),
    ("form.display_name", "Display name"),
    ("form.bio", "About you"),
    ("comment.add", "Add a comment"),
    ("comment.reply", "Reply"),
    ("comment.pending", "Your comment is waiting for approval."),
    ("moderation.approve", "Approve"),
    ("moderation.reject", "Reject"),
    ("moderation.note", "Note for the author"),
    ("notifications.mark_all", "Mark all as read"),
    ("notifications.empty", "You are all caught up."),
    ("admin.dashboard", "Dashboard"),
    ("admin.users", "Users"),
    ("pagination.next", "Next"),
    ("pagination.prev", "Previous"),
];

#[derive(Debug, thiserror::Error)]
pub enum I18nServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Translation not found")]
    NotFound,

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Translation lookups with a cache in front of the table
pub struct I18nService {
    repo: Arc<dyn TranslationRepository>,
    cache: Arc<Cache>,
    config: I18nConfig,
}

impl I18nService {
    pub fn new(repo: Arc<dyn TranslationRepository>, cache: Arc<Cache>, config: I18nConfig) -> Self {
        Self { repo, cache, config }
    }

    pub fn default_language(&self) -> &str {
        &self.config.default_language
    }

    pub fn languages(&self) -> &[String] {
        &self.config.supported_languages
    }

    pub fn is_supported(&self, language: &str) -> bool {
        self.config.is_supported(language)
    }

    /// The message for `key`, never failing
    pub async fn translate(&self, key: &str, language: &str) -> String {
        match self.catalog(language).await {
            Ok(catalog) => catalog.get(key).cloned().unwrap_or_else(|| key.to_string()),
            Err(e) => {
                tracing::warn!("Failed to load {} catalog: {}", language, e);
                builtin(key).unwrap_or(key).to_string()
            }
        }
    }

    /// All messages for `language` with fallbacks applied
    pub async fn catalog(&self, language: &str) -> Result<Arc<HashMap<String, String>>, I18nServiceError> {
        let language = if self.is_supported(language) {
            language
        } else {
            self.default_language()
        };
        let key = format!("{}{}", CACHE_PREFIX, language);
        if let Ok(Some(catalog)) = self.cache.get::<HashMap<String, String>>(&key).await {
            return Ok(Arc::new(catalog));
        }

        let mut catalog: HashMap<String, String> = DEFAULT_MESSAGES
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut layers = vec![self.default_language()];
        if language != self.default_language() {
            layers.push(language);
        }
        for layer in layers {
            for row in self
                .repo
                .list_by_language(layer)
                .await
                .context("Failed to load translations")?
            {
                catalog.insert(row.key, row.value);
            }
        }

        if let Err(e) = self.cache.set(&key, &catalog, CACHE_TTL).await {
            tracing::warn!("Failed to cache {} catalog: {}", language, e);
        }
        Ok(Arc::new(catalog))
    }

    /// Stored strings for one language
    pub async fn list(&self, language: &str) -> Result<Vec<Translation>, I18nServiceError> {
        Ok(self
            .repo
            .list_by_language(language)
            .await
            .context("Failed to list translations")?)
    }

    pub async fn set(&self, key: &str, language: &str, value: &str) -> Result<(), I18nServiceError> {
        let key = key.trim();
        if key.is_empty() || key.len() > MAX_KEY_LENGTH {
            return Err(I18nServiceError::ValidationError(format!(
                "Key must be 1 to {} characters",
                MAX_KEY_LENGTH
            )));
        }
        if !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(I18nServiceError::ValidationError(
                "Key may only contain letters, digits, '.', '_' and '-'".into(),
            ));
        }
        if !self.is_supported(language) {
            return Err(I18nServiceError::ValidationError(format!(
                "Unsupported language '{}'",
                language
            )));
        }
        if value.chars().count() > MAX_VALUE_LENGTH {
            return Err(I18nServiceError::ValidationError(format!(
                "Value cannot exceed {} characters",
                MAX_VALUE_LENGTH
            )));
        }

        self.repo
            .upsert(key, language, value)
            .await
            .context("Failed to save translation")?;
        self.invalidate().await;
        Ok(())
    }

    pub async fn delete(&self, key: &str, language: &str) -> Result<(), I18nServiceError> {
        let removed = self
            .repo
            .delete(key, language)
            .await
            .context("Failed to delete translation")?;
        if !removed {
            return Err(I18nServiceError::NotFound);
        }
        self.invalidate().await;
        Ok(())
    }

    /// Translated keys per supported language
    pub async fn coverage(&self) -> Result<Vec<LanguageCoverage>, I18nServiceError> {
        let mut keys: Vec<String> = self.repo.keys().await.context("Failed to list keys")?;
        keys.extend(DEFAULT_MESSAGES.iter().map(|(k, _)| k.to_string()));
        keys.sort();
        keys.dedup();
        let total = keys.len() as i64;

        let counts: BTreeMap<String, i64> = self
            .repo
            .count_by_language()
            .await
            .context("Failed to count translations")?
            .into_iter()
            .collect();

        Ok(self
            .languages()
            .iter()
            .map(|language| {
                let stored = counts.get(language).copied().unwrap_or(0);
                let translated = if *language == "en" {
                    // English ships with the built-in messages
                    total
                } else {
                    stored.min(total)
                };
                LanguageCoverage {
                    language: language.clone(),
                    translated,
                    total,
                }
            })
            .collect())
    }

    /// Pick the request language.
    ///
    /// Order: explicit query, `lang` cookie, the user's preference,
    /// `Accept-Language`, then the default.
    pub fn negotiate(
        &self,
        query: Option<&str>,
        cookie: Option<&str>,
        accept_language: Option<&str>,
        user: Option<&User>,
    ) -> String {
        let preferred = user.and_then(|u| u.preferred_language.as_deref());
        for candidate in [query, cookie, preferred].into_iter().flatten() {
            let candidate = candidate.trim().to_lowercase();
            if self.is_supported(&candidate) {
                return candidate;
            }
        }
        if let Some(header) = accept_language {
            for tag in parse_accept_language(header) {
                if self.is_supported(&tag) {
                    return tag;
                }
                if let Some((primary, _)) = tag.split_once('-') {
                    if self.is_supported(primary) {
                        return primary.to_string();
                    }
                }
            }
        }
        self.default_language().to_string()
    }

    async fn invalidate(&self) {
        if let Err(e) = self.cache.delete_pattern(&format!("{}*", CACHE_PREFIX)).await {
            tracing::warn!("Failed to invalidate translation cache: {}", e);
        }
    }
}

fn builtin(key: &str) -> Option<&'static str> {
    DEFAULT_MESSAGES.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// Language tags from an `Accept-Language` header, best first
pub fn parse_accept_language(header: &str) -> Vec<String> {
    let mut tags: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.trim().split(';');
            let tag = pieces.next()?.trim().to_lowercase();
            if tag.is_empty() || tag == "*" {
                return None;
            }
            let quality = pieces
                .find_map(|p| p.trim().strip_prefix("q="))
                .and_then(|q| q.parse::<f32>().ok())
                .unwrap_or(1.0);
            (quality > 0.0).then_some((tag, quality))
        })
        .collect();
    // Stable sort keeps header order among equal weights
    tags.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    tags.into_iter().map(|(tag, _)| tag).collect()
}
