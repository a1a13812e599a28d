//! Shared API response types
//!
//! User rows are never serialized directly to strangers: the public shape
//! leaves out the e-mail address and moderation flags.

use serde::Serialize;

use crate::models::{User, UserRole, UserStatus};

/// A user as seen by themselves or by an administrator
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: String,
    pub role: UserRole,
    pub status: UserStatus,
    pub is_verified: bool,
    pub is_premium: bool,
    pub preferred_language: Option<String>,
    pub last_login_at: Option<String>,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            avatar_url: user.avatar_url(),
            id: user.id,
            username: user.username,
            email: user.email,
            display_name: user.display_name,
            bio: user.bio,
            role: user.role,
            status: user.status,
            is_verified: user.is_verified,
            is_premium: user.is_premium,
            preferred_language: user.preferred_language,
            last_login_at: user.last_login_at.map(|t| t.to_rfc3339()),
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

/// A user as shown next to their stories
#[derive(Debug, Serialize)]
pub struct PublicUserResponse {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub bio: Option<String>,
    pub avatar_url: String,
    pub role: UserRole,
    pub created_at: String,
}

impl From<User> for PublicUserResponse {
    fn from(user: User) -> Self {
        Self {
            display_name: user.public_name().to_string(),
            avatar_url: user.avatar_url(),
            id: user.id,
            username: user.username,
            bio: user.bio,
            role: user.role,
            created_at: user.created_at.to_rfc3339(),
        }
    }
}

/// Response for successful authentication
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub token: String,
    pub csrf_token: String,
    pub expires_at: String,
}

/// Paginated list in the API's envelope
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

impl<T> From<crate::models::PagedResult<T>> for ListResponse<T> {
    fn from(result: crate::models::PagedResult<T>) -> Self {
        Self {
            total_pages: result.total_pages(),
            items: result.items,
            total: result.total,
            page: result.page,
            per_page: result.per_page,
        }
    }
}

/// Plain acknowledgement
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
