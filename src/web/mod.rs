//! Server-rendered HTML pages
//!
//! Pages share the session cookie and services of the JSON API. Failures
//! become an `ErrorPage` marker on the response, and `render_error_pages`
//! turns that marker into `error.html` in the reader's language.

mod account;
mod admin;
mod assets;
mod context;
mod pages;
mod stories;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::{self as axum_middleware, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};

use crate::api::middleware::{AppState, AuthenticatedUser, CurrentSession};
use crate::api::ApiError;
use crate::models::{Session, User};

pub use context::{Flash, FlashKind, PageContext};

/// Build the HTML router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(pages::home))
        .route("/language/{lang}", get(pages::set_language))
        .route("/static/{*path}", get(assets::serve_static))
        // Stories
        .route("/write", get(stories::new_story_form).post(stories::create_story))
        .route("/stories/{story}", get(pages::story_page))
        .route("/stories/{story}/edit", get(stories::edit_story_form).post(stories::update_story))
        .route("/stories/{story}/submit", post(stories::submit_story))
        .route("/stories/{story}/delete", post(stories::delete_story))
        .route(
            "/stories/{story}/translate",
            get(stories::translate_form).post(stories::save_translation),
        )
        .route("/stories/{story}/comments", post(stories::post_comment))
        .route("/comments/{id}/delete", post(stories::delete_comment))
        // Account
        .route("/login", get(account::login_form).post(account::login))
        .route("/register", get(account::register_form).post(account::register))
        .route("/logout", post(account::logout))
        .route("/profile", get(account::profile).post(account::update_profile))
        .route("/profile/password", post(account::change_password))
        .route("/my-stories", get(account::my_stories))
        .route("/notifications", get(account::notifications))
        .route("/notifications/read-all", post(account::mark_all_read))
        .route("/notifications/{id}/read", post(account::mark_read))
        // Moderation and administration
        .route("/moderation", get(admin::moderation_queue))
        .route("/moderation/stories/{id}/{action}", post(admin::moderate_story))
        .route("/moderation/comments/{id}/{action}", post(admin::moderate_comment))
        .route("/admin", get(admin::dashboard))
        .route("/admin/users", get(admin::users))
        .route("/admin/users/{id}/{action}", post(admin::user_action))
        .fallback(pages::not_found)
}

/// Wrap a router so `ErrorPage` markers are rendered
pub fn with_error_pages(router: Router<AppState>, state: AppState) -> Router<AppState> {
    router.layer(axum_middleware::from_fn_with_state(state, render_error_pages))
}

// ============================================================================
// Errors
// ============================================================================

/// Failure of an HTML handler
#[derive(Debug)]
pub enum WebError {
    /// Send the reader to the login page
    LoginRequired,
    Page { status: StatusCode, message: String },
}

impl WebError {
    pub fn page(status: StatusCode, message: impl Into<String>) -> Self {
        WebError::Page {
            status,
            message: message.into(),
        }
    }

    pub fn not_found() -> Self {
        Self::page(StatusCode::NOT_FOUND, "This page does not exist")
    }
}

/// Marker read by `render_error_pages`
#[derive(Debug, Clone)]
struct ErrorPage {
    message: String,
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        match self {
            WebError::LoginRequired => {
                context::redirect_with_flash("/login", FlashKind::Error, "Please log in first")
            }
            WebError::Page { status, message } => {
                let mut response = status.into_response();
                response.extensions_mut().insert(ErrorPage { message });
                response
            }
        }
    }
}

impl From<ApiError> for WebError {
    fn from(err: ApiError) -> Self {
        match err.status() {
            StatusCode::UNAUTHORIZED => WebError::LoginRequired,
            status => WebError::Page {
                status,
                message: err.error.message,
            },
        }
    }
}

macro_rules! web_error_from {
    ($($error:ty),* $(,)?) => {
        $(
            impl From<$error> for WebError {
                fn from(err: $error) -> Self {
                    ApiError::from(err).into()
                }
            }
        )*
    };
}

web_error_from!(
    crate::services::UserServiceError,
    crate::services::StoryServiceError,
    crate::services::CommentServiceError,
    crate::services::CategoryServiceError,
    crate::services::TagServiceError,
    crate::services::NotificationServiceError,
    crate::services::SettingsServiceError,
    crate::services::I18nServiceError,
    crate::services::StatisticsServiceError,
    crate::services::BackupError,
);

async fn render_error_pages(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let headers = request.headers().clone();
    let user = request.extensions().get::<AuthenticatedUser>().map(|u| u.0.clone());
    let session = request.extensions().get::<CurrentSession>().map(|s| s.0.clone());

    let response = next.run(request).await;
    let Some(error) = response.extensions().get::<ErrorPage>().cloned() else {
        return response;
    };

    let status = response.status();
    let mut page = PageContext::new(&state, &headers, user.as_ref(), session.as_ref(), None).await;
    page.insert("status", &status.as_u16());
    page.insert("error_message", &error.message);
    page.render_with_status(&state, "error.html", status)
}

// ============================================================================
// Extractors
// ============================================================================

/// Whoever is reading the page, if signed in
#[derive(Debug, Clone, Default)]
pub struct Viewer {
    pub user: Option<User>,
    pub session: Option<Session>,
}

impl<S> FromRequestParts<S> for Viewer
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Viewer {
            user: parts.extensions.get::<AuthenticatedUser>().map(|u| u.0.clone()),
            session: parts.extensions.get::<CurrentSession>().map(|s| s.0.clone()),
        })
    }
}

/// A signed-in reader; anyone else is sent to the login page
#[derive(Debug, Clone)]
pub struct SignedIn {
    pub user: User,
    pub session: Session,
}

impl<S> FromRequestParts<S> for SignedIn
where
    S: Send + Sync,
{
    type Rejection = WebError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts.extensions.get::<AuthenticatedUser>().map(|u| u.0.clone());
        let session = parts.extensions.get::<CurrentSession>().map(|s| s.0.clone());
        match (user, session) {
            (Some(user), Some(session)) => Ok(SignedIn { user, session }),
            _ => Err(WebError::LoginRequired),
        }
    }
}

#[cfg(test)]
mod tests;
