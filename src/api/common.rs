//! Common API utilities and shared types
//!
//! This module contains shared utilities used across multiple API endpoints.

use axum::http::{header, HeaderMap};
use serde::Deserialize;

use crate::api::middleware::{cookie_value, AppState};
use crate::models::{ListParams, User};

/// Name of the cookie holding the chosen interface language
pub const LANG_COOKIE: &str = "lang";

// ============================================================================
// Pagination Defaults
// ============================================================================

/// Default page number (1-indexed)
pub fn default_page() -> u32 {
    1
}

/// Default page size for public APIs
pub fn default_page_size() -> u32 {
    10
}

/// Default page size for admin APIs
pub fn default_per_page() -> u32 {
    20
}

// ============================================================================
// Query Types
// ============================================================================

/// Basic pagination query parameters
#[derive(Debug, Deserialize)]
pub struct PaginationQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub per_page: u32,
}

impl PaginationQuery {
    pub fn params(&self) -> ListParams {
        ListParams::new(self.page, self.per_page)
    }
}

/// Admin pagination query parameters
#[derive(Debug, Deserialize)]
pub struct AdminPaginationQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

impl AdminPaginationQuery {
    pub fn params(&self) -> ListParams {
        ListParams::new(self.page, self.per_page)
    }
}

/// `?lang=` override
#[derive(Debug, Default, Deserialize)]
pub struct LangQuery {
    pub lang: Option<String>,
}

// ============================================================================
// Language
// ============================================================================

/// Language of a request, negotiated from query, cookie, user and headers
pub fn request_language(
    state: &AppState,
    headers: &HeaderMap,
    query: Option<&str>,
    user: Option<&User>,
) -> String {
    let cookie = cookie_value(headers, LANG_COOKIE);
    let accept = headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|value| value.to_str().ok());
    state
        .i18n_service
        .negotiate(query, cookie.as_deref(), accept, user)
}

/// `Set-Cookie` value remembering the interface language for a year
pub fn lang_cookie(language: &str) -> String {
    format!("{}={}; Path=/; SameSite=Lax; Max-Age=31536000", LANG_COOKIE, language)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_params_are_clamped() {
        let query = PaginationQuery { page: 0, per_page: 500 };
        let params = query.params();
        assert_eq!(params.page, 1);
        assert_eq!(params.per_page, 100);
    }

    #[test]
    fn test_lang_cookie() {
        assert_eq!(lang_cookie("es"), "lang=es; Path=/; SameSite=Lax; Max-Age=31536000");
    }
}
