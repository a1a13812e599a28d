//! Authentication API endpoints
//!
//! Handles HTTP requests for user authentication:
//! - POST /api/v1/auth/register - User registration
//! - POST /api/v1/auth/login - User login
//! - POST /api/v1/auth/logout - User logout
//! - GET /api/v1/auth/me - Get current user
//! - PUT /api/v1/auth/profile - Update display name, bio and language
//! - PUT /api/v1/auth/password - Change password

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{
    clear_session_cookie, client_info, session_cookie, ApiError, AppState, AuthenticatedUser,
    CurrentSession,
};
use crate::api::responses::{AuthResponse, MessageResponse, UserResponse};
use crate::models::{Session, UpdateProfileInput, User};
use crate::services::user::{LoginInput, RegisterInput};

/// Request body for user registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub preferred_language: Option<String>,
}

/// Request body for user login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username_or_email: String,
    pub password: String,
}

/// Request body for changing password
#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Response for the registration check
#[derive(Debug, Serialize)]
pub struct RegistrationStatusResponse {
    pub registration_open: bool,
    pub has_admin: bool,
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(get_current_user))
        .route("/profile", put(update_profile))
        .route("/password", put(change_password))
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/registration", get(registration_status))
}

fn auth_response(state: &AppState, user: User, session: Session) -> impl IntoResponse {
    let cookie = session_cookie(&session.id, state.config.security.session_days);
    let body = AuthResponse {
        user: UserResponse::from(user),
        token: session.id,
        csrf_token: session.csrf_token,
        expires_at: session.expires_at.to_rfc3339(),
    };
    ([(header::SET_COOKIE, cookie)], Json(body))
}

/// GET /api/v1/auth/registration - Whether new members may sign up
async fn registration_status(
    State(state): State<AppState>,
) -> Result<Json<RegistrationStatusResponse>, ApiError> {
    let is_first = state.user_service.is_first_user().await?;
    let settings = state.settings_service.get_site_settings().await?;
    Ok(Json(RegistrationStatusResponse {
        registration_open: is_first || settings.registration_open,
        has_admin: !is_first,
    }))
}

/// POST /api/v1/auth/register - User registration
///
/// The first account becomes the admin and is always accepted. Later
/// sign-ups need registration to be open.
async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let is_first = state.user_service.is_first_user().await?;
    if !is_first && !state.settings_service.get_site_settings().await?.registration_open {
        return Err(ApiError::forbidden("Registration is closed"));
    }

    let client = client_info(&headers);
    let password = body.password.clone();
    let mut input = RegisterInput::new(body.username, body.email, body.password);
    input.preferred_language = body.preferred_language;

    let user = state.user_service.register(input, &client).await?;
    let (user, session) = state
        .user_service
        .login(LoginInput::new(&user.username, password), &client)
        .await?;

    Ok((StatusCode::CREATED, auth_response(&state, user, session)))
}

/// POST /api/v1/auth/login - User login
async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let client = client_info(&headers);
    let (user, session) = state
        .user_service
        .login(LoginInput::new(body.username_or_email, body.password), &client)
        .await?;
    Ok(auth_response(&state, user, session))
}

/// POST /api/v1/auth/logout - End the current session
async fn logout(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Result<impl IntoResponse, ApiError> {
    state.user_service.logout(&session.id).await?;
    Ok((
        [(header::SET_COOKIE, clear_session_cookie())],
        Json(MessageResponse::new("Logged out")),
    ))
}

/// GET /api/v1/auth/me - Get current user
async fn get_current_user(AuthenticatedUser(user): AuthenticatedUser) -> Json<UserResponse> {
    Json(UserResponse::from(user))
}

/// PUT /api/v1/auth/profile - Update the current user's profile
async fn update_profile(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    Json(body): Json<UpdateProfileInput>,
) -> Result<Json<UserResponse>, ApiError> {
    let updated = state.user_service.update_profile(user.id, body).await?;
    Ok(Json(UserResponse::from(updated)))
}

/// PUT /api/v1/auth/password - Change password, ending other sessions
async fn change_password(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    CurrentSession(session): CurrentSession,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .user_service
        .change_password(user.id, &session.id, &body.current_password, &body.new_password)
        .await?;
    Ok(Json(MessageResponse::new("Password changed")))
}
