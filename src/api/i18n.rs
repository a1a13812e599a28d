//! Interface language API endpoints
//!
//! - GET /api/v1/i18n/languages - Supported languages and the negotiated one
//! - GET /api/v1/i18n/{lang} - Message catalog of a language
//! - POST /api/v1/i18n/language - Remember a language in a cookie
//! - GET /api/v1/admin/translations?lang= - Stored strings (admin)
//! - PUT /api/v1/admin/translations - Add or replace a string (admin)
//! - DELETE /api/v1/admin/translations/{lang}/{key} - Remove a string (admin)
//! - GET /api/v1/admin/translations/coverage - Translated keys per language

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::api::common::{lang_cookie, request_language, LangQuery};
use crate::api::middleware::{ApiError, AppState, MaybeUser};
use crate::api::responses::MessageResponse;
use crate::models::{LanguageCoverage, Translation};

#[derive(Debug, Serialize)]
pub struct LanguagesResponse {
    pub supported: Vec<String>,
    pub default: String,
    pub current: String,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub language: String,
    pub messages: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct SetLanguageRequest {
    pub language: String,
}

#[derive(Debug, Deserialize)]
pub struct TranslationRequest {
    pub key: String,
    pub language: String,
    pub value: String,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/languages", get(languages))
        .route("/language", post(set_language))
        .route("/{lang}", get(catalog))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_translations).put(set_translation))
        .route("/coverage", get(coverage))
        .route("/{lang}/{key}", delete(delete_translation))
}

async fn languages(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    headers: HeaderMap,
    Query(query): Query<LangQuery>,
) -> Json<LanguagesResponse> {
    let current = request_language(&state, &headers, query.lang.as_deref(), user.as_ref());
    Json(LanguagesResponse {
        supported: state.i18n_service.languages().to_vec(),
        default: state.i18n_service.default_language().to_string(),
        current,
    })
}

/// GET /api/v1/i18n/{lang} - Unsupported languages get the default catalog
async fn catalog(
    State(state): State<AppState>,
    Path(lang): Path<String>,
) -> Result<Json<CatalogResponse>, ApiError> {
    let language = if state.i18n_service.is_supported(&lang) {
        lang
    } else {
        state.i18n_service.default_language().to_string()
    };
    let messages = state.i18n_service.catalog(&language).await?;
    Ok(Json(CatalogResponse {
        language,
        messages: (*messages).clone(),
    }))
}

async fn set_language(
    State(state): State<AppState>,
    Json(body): Json<SetLanguageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let language = body.language.trim().to_lowercase();
    if !state.i18n_service.is_supported(&language) {
        return Err(ApiError::validation_error(format!(
            "Unsupported language '{}'",
            language
        )));
    }
    Ok((
        [(header::SET_COOKIE, lang_cookie(&language))],
        Json(MessageResponse::new(format!("Language set to {}", language))),
    ))
}

async fn list_translations(
    State(state): State<AppState>,
    Query(query): Query<LangQuery>,
) -> Result<Json<Vec<Translation>>, ApiError> {
    let language = query
        .lang
        .unwrap_or_else(|| state.i18n_service.default_language().to_string());
    Ok(Json(state.i18n_service.list(&language).await?))
}

async fn set_translation(
    State(state): State<AppState>,
    Json(body): Json<TranslationRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .i18n_service
        .set(&body.key, &body.language, &body.value)
        .await?;
    Ok(Json(MessageResponse::new("Translation saved")))
}

async fn delete_translation(
    State(state): State<AppState>,
    Path((lang, key)): Path<(String, String)>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.i18n_service.delete(&key, &lang).await?;
    Ok(Json(MessageResponse::new("Translation removed")))
}

async fn coverage(State(state): State<AppState>) -> Result<Json<Vec<LanguageCoverage>>, ApiError> {
    Ok(Json(state.i18n_service.coverage().await?))
}
