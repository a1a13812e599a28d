//! Request context shared by every HTML page
//!
//! Covers the negotiated language and its catalog, the signed-in user, the
//! CSRF token of the session, and one-shot flash messages.

use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Serialize;
use tera::Context as TeraContext;

use crate::api::common::request_language;
use crate::api::middleware::{cookie_value, AppState};
use crate::models::{Permission, Session, User};
use crate::web::WebError;

/// Cookie carrying a message to the next page
pub const FLASH_COOKIE: &str = "flash";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

impl Flash {
    fn encode(&self) -> String {
        let kind = match self.kind {
            FlashKind::Success => "success",
            FlashKind::Error => "error",
        };
        urlencoding::encode(&format!("{}:{}", kind, self.message)).into_owned()
    }

    fn decode(raw: &str) -> Option<Self> {
        let decoded = urlencoding::decode(raw).ok()?;
        let (kind, message) = decoded.split_once(':')?;
        let kind = match kind {
            "success" => FlashKind::Success,
            "error" => FlashKind::Error,
            _ => return None,
        };
        Some(Self {
            kind,
            message: message.to_string(),
        })
    }

    /// Read the flash cookie of a request
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        cookie_value(headers, FLASH_COOKIE)
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| Self::decode(&raw))
    }
}

/// Everything a template needs besides its own data
pub struct PageContext {
    pub context: TeraContext,
    pub lang: String,
    /// A flash cookie was shown and must be cleared
    flash_consumed: bool,
}

impl PageContext {
    /// Build the base context: language, catalog, site, user and flash
    pub async fn new(
        state: &AppState,
        headers: &HeaderMap,
        user: Option<&User>,
        session: Option<&Session>,
        lang_query: Option<&str>,
    ) -> Self {
        let lang = request_language(state, headers, lang_query, user);
        match state.i18n_service.catalog(&lang).await {
            Ok(catalog) => state.view.set_catalog(&lang, catalog),
            Err(e) => tracing::warn!("Failed to load {} catalog: {}", lang, e),
        }

        let mut context = TeraContext::new();
        context.insert("lang", &lang);
        context.insert("languages", state.i18n_service.languages());

        match state.settings_service.get_site_settings().await {
            Ok(settings) => {
                context.insert("site_name", &settings.site_name);
                context.insert("site_description", &settings.site_description);
            }
            Err(e) => {
                tracing::warn!("Failed to load site settings: {}", e);
                context.insert("site_name", &state.config.site.name);
                context.insert("site_description", "");
            }
        }

        context.insert("current_user", &user);
        context.insert("is_staff", &user.is_some_and(|u| u.has_permission(Permission::ModerateStories)));
        context.insert("is_admin", &user.is_some_and(|u| u.has_permission(Permission::ManageUsers)));
        context.insert("csrf_token", &session.map(|s| s.csrf_token.as_str()).unwrap_or_default());

        let unread = match user {
            Some(user) => state
                .notification_service
                .unread_count(user.id)
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!("Failed to count notifications: {}", e);
                    0
                }),
            None => 0,
        };
        context.insert("unread_count", &unread);

        let flash = Flash::from_headers(headers);
        context.insert("flash", &flash);

        Self {
            context,
            lang,
            flash_consumed: flash.is_some(),
        }
    }

    pub fn insert<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) {
        self.context.insert(key, value);
    }

    /// Render a template into a response
    pub fn render(self, state: &AppState, template: &str) -> Response {
        self.render_with_status(state, template, StatusCode::OK)
    }

    pub fn render_with_status(self, state: &AppState, template: &str, status: StatusCode) -> Response {
        let html = state.view.render_with_fallback(template, &self.context);
        let mut response = (status, Html(html)).into_response();
        if self.flash_consumed {
            if let Ok(value) = HeaderValue::from_str(&clear_flash_cookie()) {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
        }
        response
    }
}

fn flash_cookie(flash: &Flash) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age=60", FLASH_COOKIE, flash.encode())
}

fn clear_flash_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", FLASH_COOKIE)
}

/// 303 redirect carrying a flash message
pub fn redirect_with_flash(to: &str, kind: FlashKind, message: impl Into<String>) -> Response {
    let flash = Flash {
        kind,
        message: message.into(),
    };
    let mut response = Redirect::to(to).into_response();
    if let Ok(value) = HeaderValue::from_str(&flash_cookie(&flash)) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

pub fn success(to: &str, message: impl Into<String>) -> Response {
    redirect_with_flash(to, FlashKind::Success, message)
}

/// Send the user back to a form with the failure as a flash message.
///
/// Internal errors still produce the error page.
pub fn redirect_on_error(to: &str, err: impl Into<crate::api::ApiError>) -> Response {
    let err: crate::api::ApiError = err.into();
    if err.status() == StatusCode::INTERNAL_SERVER_ERROR {
        return WebError::from(err).into_response();
    }
    redirect_with_flash(to, FlashKind::Error, err.error.message)
}

/// Forms of signed-in users must echo the session's CSRF token
pub fn check_csrf(session: &Session, token: &str) -> Result<(), WebError> {
    if !token.is_empty() && token == session.csrf_token {
        Ok(())
    } else {
        tracing::warn!("CSRF token mismatch for user {}", session.user_id);
        Err(WebError::page(StatusCode::FORBIDDEN, "Your form expired, please try again"))
    }
}

/// Local path to return to after a form, never another site.
///
/// Browsers drop tabs and newlines from URLs, so any control character or
/// whitespace rejects the target. Non-ASCII characters are percent-encoded
/// to keep the `Location` header a valid URI.
pub fn safe_redirect_target(target: Option<&str>) -> String {
    let is_local = |path: &str| {
        path.starts_with('/')
            && !path.starts_with("//")
            && !path.contains('\\')
            && !path.chars().any(|c| c.is_control() || c.is_whitespace())
    };
    match target {
        Some(path) if is_local(path) => encode_non_ascii(path),
        _ => "/".to_string(),
    }
}

fn encode_non_ascii(path: &str) -> String {
    let mut encoded = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii() {
            encoded.push(c);
        } else {
            encoded.push_str(&urlencoding::encode(c.encode_utf8(&mut [0; 4])));
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flash_cookie_round_trip() {
        let flash = Flash {
            kind: FlashKind::Error,
            message: "Title is required; try again".into(),
        };
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("lang=es; flash={}", flash.encode())).unwrap(),
        );
        assert_eq!(Flash::from_headers(&headers), Some(flash));
    }

    #[test]
    fn test_flash_ignores_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("flash=bogus"));
        assert!(Flash::from_headers(&headers).is_none());
        headers.insert(header::COOKIE, HeaderValue::from_static("flash="));
        assert!(Flash::from_headers(&headers).is_none());
    }

    #[test]
    fn test_redirect_with_flash_sets_cookie() {
        let response = success("/stories/x", "Saved");
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("flash=success%3ASaved"));
    }

    #[test]
    fn test_safe_redirect_target() {
        assert_eq!(safe_redirect_target(Some("/my-stories")), "/my-stories");
        assert_eq!(safe_redirect_target(Some("//evil.example")), "/");
        assert_eq!(safe_redirect_target(Some("https://evil.example")), "/");
        assert_eq!(safe_redirect_target(None), "/");
        assert_eq!(safe_redirect_target(Some("/?tag=diet&page=2")), "/?tag=diet&page=2");
    }

    #[test]
    fn test_safe_redirect_target_rejects_hidden_characters() {
        for target in [
            "/\t/evil.example",
            "/\n/evil.example",
            "/\r\n/evil.example",
            "/\u{0}/evil.example",
            "/ /evil.example",
            "/my stories",
            "/\\evil.example",
        ] {
            assert_eq!(safe_redirect_target(Some(target)), "/", "{:?}", target);
        }
    }

    #[test]
    fn test_safe_redirect_target_encodes_non_ascii() {
        assert_eq!(safe_redirect_target(Some("/stories/straße")), "/stories/stra%C3%9Fe");
        assert_eq!(
            safe_redirect_target(Some("/stories/stra%C3%9Fe?lang=de")),
            "/stories/stra%C3%9Fe?lang=de"
        );
    }
}
