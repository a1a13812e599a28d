//! Public reading pages

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};

use crate::api::common::{default_page, lang_cookie};
use crate::api::middleware::AppState;
use crate::models::{ListParams, Permission, StoryFilter, StorySummary};
use crate::web::context::safe_redirect_target;
use crate::web::{PageContext, Viewer, WebError};

const HOME_PAGE_SIZE: u32 = 12;
const TAG_CLOUD_SIZE: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct HomeQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    pub category: Option<String>,
    pub tag: Option<String>,
    pub language: Option<String>,
    pub lang: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StoryQuery {
    pub lang: Option<String>,
}

/// Page numbers and items of a list, as templates use them
#[derive(Debug, Serialize)]
pub struct Pager<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub total_pages: u32,
    pub has_prev: bool,
    pub has_next: bool,
}

impl<T> From<crate::models::PagedResult<T>> for Pager<T> {
    fn from(result: crate::models::PagedResult<T>) -> Self {
        Self {
            total_pages: result.total_pages(),
            has_prev: result.has_prev(),
            has_next: result.has_next(),
            page: result.page,
            total: result.total,
            items: result.items,
        }
    }
}

/// GET / - Published stories with category, tag and language filters
pub async fn home(
    State(state): State<AppState>,
    viewer: Viewer,
    headers: HeaderMap,
    Query(query): Query<HomeQuery>,
) -> Result<Response, WebError> {
    let mut page = PageContext::new(
        &state,
        &headers,
        viewer.user.as_ref(),
        viewer.session.as_ref(),
        query.lang.as_deref(),
    )
    .await;

    let category = match query.category.as_deref().filter(|s| !s.is_empty()) {
        Some(slug) => Some(
            state
                .category_service
                .get_by_slug(slug)
                .await?
                .ok_or_else(WebError::not_found)?,
        ),
        None => None,
    };
    let filter = StoryFilter {
        category_id: category.as_ref().map(|c| c.id),
        tag_slug: query.tag.clone().filter(|s| !s.is_empty()),
        language: query.language.clone().filter(|s| !s.is_empty()),
        ..StoryFilter::default()
    };
    let params = ListParams::new(query.page, HOME_PAGE_SIZE);
    let stories: Pager<StorySummary> = state
        .story_service
        .list_published(filter, &page.lang, viewer.user.as_ref(), &params)
        .await?
        .into();

    let featured = if query.page <= 1 && category.is_none() && query.tag.is_none() {
        let filter = StoryFilter {
            featured_only: true,
            ..StoryFilter::default()
        };
        state
            .story_service
            .list_published(filter, &page.lang, viewer.user.as_ref(), &ListParams::new(1, 3))
            .await?
            .items
    } else {
        Vec::new()
    };

    page.insert("stories", &stories);
    page.insert("featured", &featured);
    page.insert("categories", &state.category_service.list_with_counts().await?);
    page.insert("tags", &state.tag_service.tag_cloud(TAG_CLOUD_SIZE).await?);
    page.insert("current_category", &category);
    page.insert("current_tag", &query.tag);
    page.insert("current_language", &query.language);
    Ok(page.render(&state, "index.html"))
}

/// GET /stories/{slug} - A story, its language versions and comments
pub async fn story_page(
    State(state): State<AppState>,
    viewer: Viewer,
    headers: HeaderMap,
    Path(slug): Path<String>,
    Query(query): Query<StoryQuery>,
) -> Result<Response, WebError> {
    let mut page = PageContext::new(
        &state,
        &headers,
        viewer.user.as_ref(),
        viewer.session.as_ref(),
        query.lang.as_deref(),
    )
    .await;

    let view = state
        .story_service
        .get_for_viewer(&slug, &page.lang, viewer.user.as_ref())
        .await?;
    let comments = state
        .comment_service
        .list_for_story(view.story.id, viewer.user.as_ref())
        .await?;

    let user = viewer.user.as_ref();
    let is_author = user.is_some_and(|u| view.story.is_author(u));
    let is_staff = user.is_some_and(|u| u.has_permission(Permission::ModerateStories));
    let can_translate = view.story.is_published() && user.is_some_and(|u| u.is_active());
    let missing_languages: Vec<&String> = state
        .i18n_service
        .languages()
        .iter()
        .filter(|l| !view.available_languages.contains(l))
        .collect();

    page.insert("view", &view);
    page.insert("comments", &comments);
    page.insert("can_edit", &(is_author || is_staff));
    page.insert("can_delete", &(is_staff || (is_author && !view.story.is_published())));
    page.insert("can_comment", &(view.story.is_published() && user.is_some_and(|u| u.is_active())));
    page.insert("can_translate", &can_translate);
    page.insert("missing_languages", &missing_languages);
    page.insert("is_story_staff", &is_staff);
    Ok(page.render(&state, "story.html"))
}

/// GET /language/{lang} - Remember the interface language, then go back
pub async fn set_language(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(lang): Path<String>,
) -> Result<Response, WebError> {
    let lang = lang.to_lowercase();
    if !state.i18n_service.is_supported(&lang) {
        return Err(WebError::not_found());
    }
    let back = headers
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok())
        .and_then(referer_path)
        .map(|path| safe_redirect_target(Some(&path)))
        .unwrap_or_else(|| "/".to_string());

    let mut response = Redirect::to(&back).into_response();
    if let Ok(value) = HeaderValue::from_str(&lang_cookie(&lang)) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    Ok(response)
}

/// Path and query of a referer on this site, without any `lang` override
pub(crate) fn referer_path(referer: &str) -> Option<String> {
    let without_scheme = referer.split_once("://").map_or(referer, |(_, rest)| rest);
    let path = match without_scheme.find('/') {
        Some(index) => &without_scheme[index..],
        None => "/",
    };
    if path.starts_with("//") {
        return None;
    }
    let (path, query) = path.split_once('?').unwrap_or((path, ""));
    let query: Vec<&str> = query
        .split('&')
        .filter(|pair| !pair.is_empty() && !pair.starts_with("lang="))
        .collect();
    if query.is_empty() {
        Some(path.to_string())
    } else {
        Some(format!("{}?{}", path, query.join("&")))
    }
}

pub async fn not_found() -> WebError {
    WebError::not_found()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referer_path() {
        assert_eq!(referer_path("http://localhost:8080/stories/a?lang=es").as_deref(), Some("/stories/a"));
        assert_eq!(
            referer_path("https://site.example/?page=2&lang=fr&tag=x").as_deref(),
            Some("/?page=2&tag=x")
        );
        assert_eq!(referer_path("https://site.example").as_deref(), Some("/"));
    }
}
