//! API layer - HTTP handlers and routing
//!
//! JSON endpoints live under `/api/v1`; the HTML pages in [`crate::web`]
//! share the same state, session cookie and middleware stack.

pub mod admin;
pub mod auth;
pub mod categories;
pub mod comments;
pub mod common;
pub mod i18n;
pub mod middleware;
pub mod moderation;
pub mod notifications;
pub mod responses;
pub mod stories;
pub mod tags;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub use middleware::{ApiError, AppState, AuthenticatedUser, CurrentSession, MaybeUser};

/// Build the main API router
pub fn build_api_router() -> Router<AppState> {
    // Admin routes (need the admin role)
    let admin_routes = Router::new()
        .nest("/admin", admin::router())
        .nest("/admin/categories", categories::admin_router())
        .nest("/admin/tags", tags::admin_router())
        .nest("/admin/translations", i18n::admin_router())
        .route_layer(axum_middleware::from_fn(middleware::require_admin));

    // Moderator routes
    let moderation_routes = Router::new()
        .nest("/moderation", moderation::router())
        .route_layer(axum_middleware::from_fn(middleware::require_moderator));

    // Protected routes (need auth but no role)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/stories", stories::protected_router())
        .nest("/notifications", notifications::router())
        .merge(comments::protected_router())
        .merge(admin_routes)
        .merge(moderation_routes)
        .route_layer(axum_middleware::from_fn(middleware::require_auth));

    // Public routes
    Router::new()
        .nest("/auth", auth::public_router())
        .nest("/stories", stories::public_router())
        .nest("/categories", categories::public_router())
        .nest("/tags", tags::public_router())
        .nest("/i18n", i18n::public_router())
        .merge(comments::public_router())
        .merge(protected_routes)
        .fallback(api_not_found)
}

async fn api_not_found() -> ApiError {
    ApiError::not_found("No such endpoint")
}

/// Build the complete router with middleware
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::COOKIE])
        .allow_credentials(true);
    let cors = match state.config.server.cors_origin.parse::<HeaderValue>() {
        Ok(origin) => cors.allow_origin(origin),
        Err(_) => {
            tracing::warn!(
                "Invalid CORS origin '{}', cross-origin requests are disabled",
                state.config.server.cors_origin
            );
            cors
        }
    };

    Router::new()
        .nest("/api/v1", build_api_router())
        .merge(crate::web::with_error_pages(crate::web::router(), state.clone()))
        // Resolves the session for every route below
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::optional_auth,
        ))
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        // Request stats middleware (outermost layer, runs for all requests)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_stats_middleware,
        ))
        .with_state(state)
}
