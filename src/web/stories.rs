//! Writing, editing and translating stories; posting comments

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::Response,
    Form,
};
use serde::Deserialize;

use crate::api::middleware::AppState;
use crate::models::{
    AccessLevel, CreateCommentInput, CreateStoryInput, Permission, Story, StoryContent,
    TranslationInput, UpdateStoryInput, User,
};
use crate::web::context::{check_csrf, redirect_on_error, safe_redirect_target, success};
use crate::web::pages::referer_path;
use crate::web::{PageContext, SignedIn, WebError};

/// Fields of the write and edit forms
#[derive(Debug, Deserialize)]
pub struct StoryForm {
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub body: String,
    #[serde(default)]
    pub language: String,
    /// Empty for no category
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub access_level: String,
    /// Comma separated
    #[serde(default)]
    pub tags: String,
    /// Featured checkbox, moderators only
    #[serde(default)]
    pub is_featured: Option<String>,
    /// `submit` also sends the story for review
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub csrf_token: String,
}

impl StoryForm {
    fn category_id(&self) -> Option<i64> {
        self.category_id.trim().parse().ok()
    }

    fn access_level(&self) -> AccessLevel {
        self.access_level.parse().unwrap_or_default()
    }

    fn tags(&self) -> Vec<String> {
        split_tags(&self.tags)
    }

    fn summary(&self) -> Option<String> {
        Some(self.summary.trim().to_string()).filter(|s| !s.is_empty())
    }

    fn wants_review(&self) -> bool {
        self.action == "submit"
    }
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct TranslateQuery {
    pub to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TranslationForm {
    pub language: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub body: String,
    #[serde(default)]
    pub csrf_token: String,
}

#[derive(Debug, Deserialize)]
pub struct CommentForm {
    pub content: String,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub csrf_token: String,
}

/// Forms that only carry the CSRF token
#[derive(Debug, Deserialize)]
pub struct TokenForm {
    #[serde(default)]
    pub csrf_token: String,
}

// ============================================================================
// Write and edit
// ============================================================================

/// GET /write
pub async fn new_story_form(
    State(state): State<AppState>,
    signed_in: SignedIn,
    headers: HeaderMap,
) -> Result<Response, WebError> {
    let mut page = PageContext::new(&state, &headers, Some(&signed_in.user), Some(&signed_in.session), None).await;
    let language = page.lang.clone();
    page.insert("categories", &state.category_service.list().await?);
    page.insert("editing", &false);
    page.insert("story_language", &language);
    Ok(page.render(&state, "story_form.html"))
}

/// POST /write
pub async fn create_story(
    State(state): State<AppState>,
    signed_in: SignedIn,
    Form(form): Form<StoryForm>,
) -> Result<Response, WebError> {
    check_csrf(&signed_in.session, &form.csrf_token)?;
    let input = CreateStoryInput {
        title: form.title.clone(),
        summary: form.summary(),
        body: form.body.clone(),
        language: Some(form.language.clone()).filter(|l| !l.is_empty()),
        category_id: form.category_id(),
        access_level: form.access_level(),
        tags: form.tags(),
    };
    let story = match state.story_service.create(&signed_in.user, input).await {
        Ok(story) => story,
        Err(e) => return Ok(redirect_on_error("/write", e)),
    };

    let target = story.path();
    if form.wants_review() {
        return Ok(match state.story_service.submit_for_review(&signed_in.user, story.id).await {
            Ok(_) => success(&target, "Your story was sent to the moderators"),
            Err(e) => redirect_on_error(&target, e),
        });
    }
    Ok(success(&target, "Draft saved"))
}

/// GET /stories/{id}/edit
pub async fn edit_story_form(
    State(state): State<AppState>,
    signed_in: SignedIn,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<Response, WebError> {
    let story = load_story(&state, id).await?;
    require_editor(&story, &signed_in.user)?;

    let contents = state.story_service.list_contents(id).await?;
    let original = original_content(&story, &contents)?;
    let tags: Vec<String> = state
        .tag_service
        .list_for_story(id)
        .await?
        .into_iter()
        .map(|t| t.name)
        .collect();

    let mut page = PageContext::new(&state, &headers, Some(&signed_in.user), Some(&signed_in.session), None).await;
    page.insert("categories", &state.category_service.list().await?);
    page.insert("editing", &true);
    page.insert("story", &story);
    page.insert("content", original);
    page.insert("tags_text", &tags.join(", "));
    page.insert("story_language", &story.original_language);
    page.insert("translations", &contents);
    Ok(page.render(&state, "story_form.html"))
}

/// POST /stories/{id}/edit
pub async fn update_story(
    State(state): State<AppState>,
    signed_in: SignedIn,
    Path(id): Path<i64>,
    Form(form): Form<StoryForm>,
) -> Result<Response, WebError> {
    check_csrf(&signed_in.session, &form.csrf_token)?;
    let is_staff = signed_in.user.has_permission(Permission::ModerateStories);
    let input = UpdateStoryInput {
        title: Some(form.title.clone()),
        summary: Some(form.summary.trim().to_string()),
        body: Some(form.body.clone()),
        category_id: Some(form.category_id()),
        access_level: Some(form.access_level()),
        tags: Some(form.tags()),
        is_featured: is_staff.then(|| form.is_featured.is_some()),
    };

    let edit_page = format!("/stories/{}/edit", id);
    let story = match state.story_service.update(&signed_in.user, id, input).await {
        Ok(story) => story,
        Err(e) => return Ok(redirect_on_error(&edit_page, e)),
    };

    let target = story.path();
    if form.wants_review() {
        return Ok(match state.story_service.submit_for_review(&signed_in.user, id).await {
            Ok(_) => success(&target, "Your story was sent to the moderators"),
            Err(e) => redirect_on_error(&target, e),
        });
    }
    Ok(success(&target, "Story saved"))
}

/// POST /stories/{id}/submit
pub async fn submit_story(
    State(state): State<AppState>,
    signed_in: SignedIn,
    Path(id): Path<i64>,
    Form(form): Form<TokenForm>,
) -> Result<Response, WebError> {
    check_csrf(&signed_in.session, &form.csrf_token)?;
    Ok(match state.story_service.submit_for_review(&signed_in.user, id).await {
        Ok(story) => success(&story.path(), "Your story was sent to the moderators"),
        Err(e) => redirect_on_error("/my-stories", e),
    })
}

/// POST /stories/{id}/delete
pub async fn delete_story(
    State(state): State<AppState>,
    signed_in: SignedIn,
    Path(id): Path<i64>,
    Form(form): Form<TokenForm>,
) -> Result<Response, WebError> {
    check_csrf(&signed_in.session, &form.csrf_token)?;
    Ok(match state.story_service.delete(&signed_in.user, id).await {
        Ok(()) => success("/my-stories", "Story deleted"),
        Err(e) => redirect_on_error("/my-stories", e),
    })
}

// ============================================================================
// Translate
// ============================================================================

/// GET /stories/{id}/translate?to=es
pub async fn translate_form(
    State(state): State<AppState>,
    signed_in: SignedIn,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Query(query): Query<TranslateQuery>,
) -> Result<Response, WebError> {
    let story = load_story(&state, id).await?;
    let is_editor = story.is_author(&signed_in.user) || signed_in.user.has_permission(Permission::ModerateStories);
    if !is_editor && !(story.is_published() && story.access_level.permits(Some(&signed_in.user))) {
        return Err(WebError::not_found());
    }

    let contents = state.story_service.list_contents(id).await?;
    let source = original_content(&story, &contents)?;
    let target_language = query
        .to
        .filter(|l| state.i18n_service.is_supported(l) && *l != story.original_language)
        .or_else(|| {
            state
                .i18n_service
                .languages()
                .iter()
                .find(|l| !contents.iter().any(|c| &c.language == *l))
                .cloned()
        })
        .unwrap_or_default();
    let existing = contents.iter().find(|c| c.language == target_language);

    let mut page = PageContext::new(&state, &headers, Some(&signed_in.user), Some(&signed_in.session), None).await;
    page.insert("story", &story);
    page.insert("source", source);
    page.insert("existing", &existing);
    page.insert("target_language", &target_language);
    page.insert(
        "available_languages",
        &contents.iter().map(|c| c.language.as_str()).collect::<Vec<_>>(),
    );
    Ok(page.render(&state, "translate.html"))
}

/// POST /stories/{id}/translate
pub async fn save_translation(
    State(state): State<AppState>,
    signed_in: SignedIn,
    Path(id): Path<i64>,
    Form(form): Form<TranslationForm>,
) -> Result<Response, WebError> {
    check_csrf(&signed_in.session, &form.csrf_token)?;
    let language = form.language.trim().to_lowercase();
    let input = TranslationInput {
        title: form.title,
        summary: Some(form.summary.trim().to_string()).filter(|s| !s.is_empty()),
        body: form.body,
    };
    let back = format!("/stories/{}/translate?to={}", id, urlencoding::encode(&language));
    if let Err(e) = state
        .story_service
        .upsert_translation(&signed_in.user, id, &language, input)
        .await
    {
        return Ok(redirect_on_error(&back, e));
    }
    let story = load_story(&state, id).await?;
    Ok(success(
        &format!("{}?lang={}", story.path(), urlencoding::encode(&language)),
        "Thank you, the translation was saved",
    ))
}

// ============================================================================
// Comments
// ============================================================================

/// POST /stories/{id}/comments
pub async fn post_comment(
    State(state): State<AppState>,
    signed_in: SignedIn,
    Path(id): Path<i64>,
    Form(form): Form<CommentForm>,
) -> Result<Response, WebError> {
    check_csrf(&signed_in.session, &form.csrf_token)?;
    let story = load_story(&state, id).await?;
    let target = format!("{}#comments", story.path());
    let input = CreateCommentInput {
        content: form.content,
        parent_id: form.parent_id.trim().parse().ok(),
    };
    Ok(match state.comment_service.create(&signed_in.user, id, input).await {
        Ok(comment) if comment.status == crate::models::CommentStatus::Approved => {
            success(&target, "Comment posted")
        }
        Ok(_) => success(&target, "Thank you, your comment will appear once a moderator approves it"),
        Err(e) => redirect_on_error(&target, e),
    })
}

/// POST /comments/{id}/delete
pub async fn delete_comment(
    State(state): State<AppState>,
    signed_in: SignedIn,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Form(form): Form<TokenForm>,
) -> Result<Response, WebError> {
    check_csrf(&signed_in.session, &form.csrf_token)?;
    let back = headers
        .get(axum::http::header::REFERER)
        .and_then(|v| v.to_str().ok())
        .and_then(referer_path)
        .map(|path| safe_redirect_target(Some(&path)))
        .unwrap_or_else(|| "/".to_string());
    Ok(match state.comment_service.delete(&signed_in.user, id).await {
        Ok(()) => success(&back, "Comment deleted"),
        Err(e) => redirect_on_error(&back, e),
    })
}

// ============================================================================
// Helpers
// ============================================================================

async fn load_story(state: &AppState, id: i64) -> Result<Story, WebError> {
    state
        .story_service
        .get_by_id(id)
        .await?
        .ok_or_else(WebError::not_found)
}

fn require_editor(story: &Story, user: &User) -> Result<(), WebError> {
    if story.is_author(user) || user.has_permission(Permission::ModerateStories) {
        Ok(())
    } else {
        Err(WebError::page(
            axum::http::StatusCode::FORBIDDEN,
            "Only the author can edit this story",
        ))
    }
}

fn original_content<'a>(story: &Story, contents: &'a [StoryContent]) -> Result<&'a StoryContent, WebError> {
    contents
        .iter()
        .find(|c| c.language == story.original_language)
        .or_else(|| contents.first())
        .ok_or_else(WebError::not_found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_tags() {
        assert_eq!(split_tags(" dialysis, transplant ,,diet "), vec!["dialysis", "transplant", "diet"]);
        assert!(split_tags("  ").is_empty());
    }

    #[test]
    fn test_story_form_parsing() {
        let form = StoryForm {
            title: "t".into(),
            summary: "  ".into(),
            body: "b".into(),
            language: "es".into(),
            category_id: "".into(),
            access_level: "verified".into(),
            tags: String::new(),
            is_featured: None,
            action: "submit".into(),
            csrf_token: String::new(),
        };
        assert_eq!(form.category_id(), None);
        assert_eq!(form.access_level(), AccessLevel::Verified);
        assert_eq!(form.summary(), None);
        assert!(form.wants_review());
    }
}
