//! Login, registration, profile and the member's own pages

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;

use crate::api::common::default_page;
use crate::api::middleware::{clear_session_cookie, client_info, session_cookie, AppState};
use crate::models::{ListParams, Notification, Session, StorySummary, UpdateProfileInput};
use crate::services::user::{LoginInput, RegisterInput};
use crate::web::context::{check_csrf, redirect_on_error, safe_redirect_target, success, FlashKind};
use crate::web::pages::Pager;
use crate::web::stories::TokenForm;
use crate::web::{context, PageContext, SignedIn, Viewer, WebError};

const MY_STORIES_PAGE_SIZE: u32 = 20;
const NOTIFICATIONS_PAGE_SIZE: u32 = 30;

#[derive(Debug, Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username_or_email: String,
    pub password: String,
    #[serde(default)]
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterForm {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub password_confirm: String,
    #[serde(default)]
    pub preferred_language: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfileForm {
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub preferred_language: String,
    #[serde(default)]
    pub csrf_token: String,
}

#[derive(Debug, Deserialize)]
pub struct PasswordForm {
    pub current_password: String,
    pub new_password: String,
    #[serde(default)]
    pub new_password_confirm: String,
    #[serde(default)]
    pub csrf_token: String,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default)]
    pub unread: bool,
}

// ============================================================================
// Login and registration
// ============================================================================

/// GET /login
pub async fn login_form(
    State(state): State<AppState>,
    viewer: Viewer,
    headers: HeaderMap,
    Query(query): Query<NextQuery>,
) -> Result<Response, WebError> {
    if viewer.user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    let mut page = PageContext::new(&state, &headers, None, None, None).await;
    page.insert("next", &safe_redirect_target(query.next.as_deref()));
    Ok(page.render(&state, "login.html"))
}

/// POST /login
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Result<Response, WebError> {
    let client = client_info(&headers);
    let next = safe_redirect_target(form.next.as_deref());
    match state
        .user_service
        .login(LoginInput::new(form.username_or_email, form.password), &client)
        .await
    {
        Ok((user, session)) => Ok(signed_in_redirect(
            &state,
            &session,
            &next,
            format!("Welcome back, {}", user.display_name.as_deref().unwrap_or(&user.username)),
        )),
        Err(e) => Ok(redirect_on_error(
            &format!("/login?next={}", urlencoding::encode(&next)),
            e,
        )),
    }
}

/// GET /register
pub async fn register_form(
    State(state): State<AppState>,
    viewer: Viewer,
    headers: HeaderMap,
) -> Result<Response, WebError> {
    if viewer.user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    let is_first = state.user_service.is_first_user().await?;
    let open = is_first || state.settings_service.get_site_settings().await?.registration_open;

    let mut page = PageContext::new(&state, &headers, None, None, None).await;
    page.insert("registration_open", &open);
    page.insert("is_first_user", &is_first);
    Ok(page.render(&state, "register.html"))
}

/// POST /register - Create the account and sign it in
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<RegisterForm>,
) -> Result<Response, WebError> {
    let is_first = state.user_service.is_first_user().await?;
    if !is_first && !state.settings_service.get_site_settings().await?.registration_open {
        return Ok(context::redirect_with_flash("/register", FlashKind::Error, "Registration is closed"));
    }
    if form.password != form.password_confirm {
        return Ok(context::redirect_with_flash("/register", FlashKind::Error, "The passwords do not match"));
    }

    let client = client_info(&headers);
    let mut input = RegisterInput::new(form.username, form.email, form.password.clone());
    input.preferred_language = Some(form.preferred_language).filter(|l| !l.is_empty());
    let user = match state.user_service.register(input, &client).await {
        Ok(user) => user,
        Err(e) => return Ok(redirect_on_error("/register", e)),
    };

    let (_, session) = state
        .user_service
        .login(LoginInput::new(&user.username, form.password), &client)
        .await?;
    Ok(signed_in_redirect(
        &state,
        &session,
        "/",
        "Welcome! Your account is ready",
    ))
}

/// POST /logout
pub async fn logout(
    State(state): State<AppState>,
    signed_in: SignedIn,
    Form(form): Form<TokenForm>,
) -> Result<Response, WebError> {
    check_csrf(&signed_in.session, &form.csrf_token)?;
    state.user_service.logout(&signed_in.session.id).await?;
    let mut response = success("/", "You are logged out");
    response
        .headers_mut()
        .append(header::SET_COOKIE, HeaderValue::from_static(clear_session_cookie()));
    Ok(response)
}

fn signed_in_redirect(state: &AppState, session: &Session, to: &str, message: impl Into<String>) -> Response {
    let mut response = success(to, message);
    let cookie = session_cookie(&session.id, state.config.security.session_days);
    if let Ok(value) = HeaderValue::from_str(&cookie) {
        response.headers_mut().append(header::SET_COOKIE, value);
    }
    response
}

// ============================================================================
// Profile
// ============================================================================

/// GET /profile
pub async fn profile(
    State(state): State<AppState>,
    signed_in: SignedIn,
    headers: HeaderMap,
) -> Result<Response, WebError> {
    let mut page = PageContext::new(&state, &headers, Some(&signed_in.user), Some(&signed_in.session), None).await;
    page.insert("user", &crate::api::responses::UserResponse::from(signed_in.user));
    Ok(page.render(&state, "profile.html"))
}

/// POST /profile
pub async fn update_profile(
    State(state): State<AppState>,
    signed_in: SignedIn,
    Form(form): Form<ProfileForm>,
) -> Result<Response, WebError> {
    check_csrf(&signed_in.session, &form.csrf_token)?;
    let input = UpdateProfileInput {
        display_name: Some(form.display_name.trim().to_string()),
        bio: Some(form.bio.trim().to_string()),
        preferred_language: Some(form.preferred_language).filter(|l| !l.is_empty()),
    };
    Ok(match state.user_service.update_profile(signed_in.user.id, input).await {
        Ok(_) => success("/profile", "Profile saved"),
        Err(e) => redirect_on_error("/profile", e),
    })
}

/// POST /profile/password - Other sessions are logged out
pub async fn change_password(
    State(state): State<AppState>,
    signed_in: SignedIn,
    Form(form): Form<PasswordForm>,
) -> Result<Response, WebError> {
    check_csrf(&signed_in.session, &form.csrf_token)?;
    if form.new_password != form.new_password_confirm {
        return Ok(context::redirect_with_flash("/profile", FlashKind::Error, "The new passwords do not match"));
    }
    Ok(match state
        .user_service
        .change_password(
            signed_in.user.id,
            &signed_in.session.id,
            &form.current_password,
            &form.new_password,
        )
        .await
    {
        Ok(()) => success("/profile", "Password changed"),
        Err(e) => redirect_on_error("/profile", e),
    })
}

// ============================================================================
// Own stories and notifications
// ============================================================================

/// GET /my-stories - Every story of the member with its status
pub async fn my_stories(
    State(state): State<AppState>,
    signed_in: SignedIn,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Result<Response, WebError> {
    let mut page = PageContext::new(&state, &headers, Some(&signed_in.user), Some(&signed_in.session), None).await;
    let stories: Pager<StorySummary> = state
        .story_service
        .list_by_author(signed_in.user.id, &page.lang, &ListParams::new(query.page, MY_STORIES_PAGE_SIZE))
        .await?
        .into();
    page.insert("stories", &stories);
    Ok(page.render(&state, "my_stories.html"))
}

/// GET /notifications
pub async fn notifications(
    State(state): State<AppState>,
    signed_in: SignedIn,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Result<Response, WebError> {
    let list: Pager<Notification> = state
        .notification_service
        .list(
            signed_in.user.id,
            query.unread,
            &ListParams::new(query.page, NOTIFICATIONS_PAGE_SIZE),
        )
        .await?
        .into();
    let mut page = PageContext::new(&state, &headers, Some(&signed_in.user), Some(&signed_in.session), None).await;
    page.insert("notifications", &list);
    page.insert("unread_only", &query.unread);
    Ok(page.render(&state, "notifications.html"))
}

/// POST /notifications/read-all
pub async fn mark_all_read(
    State(state): State<AppState>,
    signed_in: SignedIn,
    Form(form): Form<TokenForm>,
) -> Result<Response, WebError> {
    check_csrf(&signed_in.session, &form.csrf_token)?;
    let count = state.notification_service.mark_all_read(signed_in.user.id).await?;
    tracing::debug!("User {} marked {} notifications read", signed_in.user.id, count);
    Ok(success("/notifications", "All notifications marked as read"))
}

/// POST /notifications/{id}/read - Mark read, then follow the link if any
pub async fn mark_read(
    State(state): State<AppState>,
    signed_in: SignedIn,
    Path(id): Path<i64>,
    Form(form): Form<NotificationReadForm>,
) -> Result<Response, WebError> {
    check_csrf(&signed_in.session, &form.csrf_token)?;
    if let Err(e) = state.notification_service.mark_read(id, signed_in.user.id).await {
        return Ok(redirect_on_error("/notifications", e));
    }
    let to = safe_redirect_target(form.link.as_deref().filter(|l| !l.is_empty()).or(Some("/notifications")));
    Ok(Redirect::to(&to).into_response())
}

#[derive(Debug, Deserialize)]
pub struct NotificationReadForm {
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub csrf_token: String,
}
