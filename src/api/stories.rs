//! Story API endpoints
//!
//! Handles HTTP requests for stories and their translations:
//! - GET /api/v1/stories - Published stories the reader may see
//! - GET /api/v1/stories/{slug} - One story in the request language
//! - GET /api/v1/stories/mine - The current user's stories, any status
//! - POST /api/v1/stories - Create a draft
//! - PUT /api/v1/stories/{id} - Edit metadata and original text
//! - DELETE /api/v1/stories/{id} - Delete a story
//! - POST /api/v1/stories/{id}/submit - Submit for review
//! - GET /api/v1/stories/{id}/translations - Every language version
//! - PUT /api/v1/stories/{id}/translations/{lang} - Add or edit a translation
//! - DELETE /api/v1/stories/{id}/translations/{lang} - Remove a translation

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::{default_page, default_page_size, request_language, PaginationQuery};
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser, MaybeUser};
use crate::api::responses::{ListResponse, MessageResponse};
use crate::models::{
    CreateStoryInput, ListParams, Permission, Story, StoryContent, StoryFilter, StorySummary,
    StoryView, TranslationInput, UpdateStoryInput,
};

/// Query parameters for listing stories
#[derive(Debug, Deserialize)]
pub struct ListStoriesQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub per_page: u32,
    /// Category slug
    pub category: Option<String>,
    /// Tag slug
    pub tag: Option<String>,
    /// Only stories available in this language
    pub language: Option<String>,
    #[serde(default)]
    pub featured: bool,
    /// Display language
    pub lang: Option<String>,
}

/// `?lang=` for single-story reads
#[derive(Debug, Deserialize)]
pub struct StoryLangQuery {
    pub lang: Option<String>,
}

/// Public story routes
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_stories))
        .route("/{story}", get(get_story))
}

/// Routes for signed-in members
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_story))
        .route("/mine", get(my_stories))
        .route("/{story}", put(update_story).delete(delete_story))
        .route("/{story}/submit", post(submit_story))
        .route("/{story}/translations", get(list_translations))
        .route(
            "/{story}/translations/{lang}",
            put(upsert_translation).delete(delete_translation),
        )
}

/// GET /api/v1/stories - Published stories, newest first
async fn list_stories(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    headers: HeaderMap,
    Query(query): Query<ListStoriesQuery>,
) -> Result<Json<ListResponse<StorySummary>>, ApiError> {
    let lang = request_language(&state, &headers, query.lang.as_deref(), viewer.as_ref());
    let params = ListParams::new(query.page, query.per_page);

    let category_id = match query.category.as_deref().filter(|s| !s.is_empty()) {
        Some(slug) => Some(
            state
                .category_service
                .get_by_slug(slug)
                .await?
                .ok_or_else(|| ApiError::not_found(format!("Category '{}' not found", slug)))?
                .id,
        ),
        None => None,
    };
    let filter = StoryFilter {
        category_id,
        tag_slug: query.tag.filter(|s| !s.is_empty()),
        language: query.language.filter(|s| !s.is_empty()),
        featured_only: query.featured,
        ..StoryFilter::default()
    };

    let result = state
        .story_service
        .list_published(filter, &lang, viewer.as_ref(), &params)
        .await?;
    Ok(Json(result.into()))
}

/// GET /api/v1/stories/{slug} - Read a story
async fn get_story(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Query(query): Query<StoryLangQuery>,
) -> Result<Json<StoryView>, ApiError> {
    let lang = request_language(&state, &headers, query.lang.as_deref(), viewer.as_ref());
    let view = state
        .story_service
        .get_for_viewer(&slug, &lang, viewer.as_ref())
        .await?;
    Ok(Json(view))
}

/// GET /api/v1/stories/mine - The author's own stories
async fn my_stories(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    headers: HeaderMap,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<ListResponse<StorySummary>>, ApiError> {
    let lang = request_language(&state, &headers, None, Some(&user));
    let result = state
        .story_service
        .list_by_author(user.id, &lang, &query.params())
        .await?;
    Ok(Json(result.into()))
}

/// POST /api/v1/stories - Create a draft
async fn create_story(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(body): Json<CreateStoryInput>,
) -> Result<(StatusCode, Json<Story>), ApiError> {
    let story = state.story_service.create(&user, body).await?;
    Ok((StatusCode::CREATED, Json(story)))
}

/// PUT /api/v1/stories/{id} - Edit a story
async fn update_story(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
    Json(body): Json<UpdateStoryInput>,
) -> Result<Json<Story>, ApiError> {
    Ok(Json(state.story_service.update(&user, id, body).await?))
}

/// DELETE /api/v1/stories/{id} - Delete a story
async fn delete_story(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.story_service.delete(&user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/stories/{id}/submit - Ask moderators for review
async fn submit_story(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Story>, ApiError> {
    Ok(Json(state.story_service.submit_for_review(&user, id).await?))
}

/// GET /api/v1/stories/{id}/translations - Every content of a story
///
/// Open to the author and moderators; readers get language versions through
/// the story view.
async fn list_translations(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Vec<StoryContent>>, ApiError> {
    let story = state
        .story_service
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::not_found("Story not found"))?;
    if !story.is_author(&user) && !user.has_permission(Permission::ModerateStories) {
        return Err(ApiError::forbidden("Only the author can list every version"));
    }
    Ok(Json(state.story_service.list_contents(id).await?))
}

/// PUT /api/v1/stories/{id}/translations/{lang} - Translate a story
async fn upsert_translation(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path((id, lang)): Path<(i64, String)>,
    Json(body): Json<TranslationInput>,
) -> Result<Json<StoryContent>, ApiError> {
    Ok(Json(
        state
            .story_service
            .upsert_translation(&user, id, &lang, body)
            .await?,
    ))
}

/// DELETE /api/v1/stories/{id}/translations/{lang} - Remove a translation
async fn delete_translation(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Path((id, lang)): Path<(i64, String)>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .story_service
        .delete_translation(&user, id, &lang)
        .await?;
    Ok(Json(MessageResponse::new("Translation removed")))
}
