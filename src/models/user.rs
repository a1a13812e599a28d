//! User model
//!
//! Community members, their roles and the permissions those roles grant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A registered community member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    /// Username (unique)
    pub username: String,
    /// Email address (unique)
    pub email: String,
    /// Password hash (argon2)
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub role: UserRole,
    pub status: UserStatus,
    /// Verified members may read `verified` stories
    pub is_verified: bool,
    /// Premium members may read `premium` stories
    pub is_premium: bool,
    /// Interface language chosen by the user
    pub preferred_language: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new active member.
    ///
    /// The password must already be hashed, see `services::password::hash_password()`.
    pub fn new(username: String, email: String, password_hash: String, role: UserRole) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            username,
            email,
            password_hash,
            display_name: None,
            bio: None,
            role,
            status: UserStatus::Active,
            is_verified: false,
            is_premium: false,
            preferred_language: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_banned(&self) -> bool {
        self.status == UserStatus::Banned
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }

    /// Check a permission. Banned users hold none.
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.is_active() && self.role.grants(permission)
    }

    /// Staff are users who moderate stories
    pub fn is_staff(&self) -> bool {
        self.has_permission(Permission::ModerateStories)
    }

    /// Name shown in the interface
    pub fn public_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }

    /// Gravatar URL derived from the e-mail address
    pub fn avatar_url(&self) -> String {
        gravatar_url(&self.email)
    }
}

/// Gravatar URL for an e-mail address
pub fn gravatar_url(email: &str) -> String {
    let hash = md5::compute(email.trim().to_lowercase().as_bytes());
    format!("https://www.gravatar.com/avatar/{:x}?d=identicon", hash)
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Every permission
    Admin,
    /// Reviews stories and comments
    Moderator,
    /// Writes, translates and comments
    #[default]
    Member,
}

impl UserRole {
    /// Permissions granted by this role
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            UserRole::Admin => Permission::ALL,
            UserRole::Moderator => &[Permission::ModerateStories, Permission::ModerateComments],
            UserRole::Member => &[],
        }
    }

    pub fn grants(&self, permission: Permission) -> bool {
        self.permissions().contains(&permission)
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::Moderator => write!(f, "moderator"),
            UserRole::Member => write!(f, "member"),
        }
    }
}

impl FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "moderator" => Ok(UserRole::Moderator),
            "member" => Ok(UserRole::Member),
            _ => Err(anyhow::anyhow!("Invalid user role: {}", s)),
        }
    }
}

/// User status for account state.
///
/// Banned users cannot log in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Banned,
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserStatus::Active => write!(f, "active"),
            UserStatus::Banned => write!(f, "banned"),
        }
    }
}

impl FromStr for UserStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(UserStatus::Active),
            "banned" => Ok(UserStatus::Banned),
            _ => Err(anyhow::anyhow!("Invalid user status: {}", s)),
        }
    }
}

/// Role-based permissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ModerateStories,
    ModerateComments,
    ManageUsers,
    ManageTranslations,
    ViewStatistics,
    ManageBackups,
}

impl Permission {
    pub const ALL: &'static [Permission] = &[
        Permission::ModerateStories,
        Permission::ModerateComments,
        Permission::ManageUsers,
        Permission::ManageTranslations,
        Permission::ViewStatistics,
        Permission::ManageBackups,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ModerateStories => "moderate_stories",
            Permission::ModerateComments => "moderate_comments",
            Permission::ManageUsers => "manage_users",
            Permission::ManageTranslations => "manage_translations",
            Permission::ViewStatistics => "view_statistics",
            Permission::ManageBackups => "manage_backups",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for creating a user row
#[derive(Debug, Clone)]
pub struct CreateUserInput {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub preferred_language: Option<String>,
}

/// Profile fields a user may change about themselves
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateProfileInput {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub preferred_language: Option<String>,
}

/// Filters for the admin user list
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserFilter {
    pub role: Option<UserRole>,
    pub status: Option<UserStatus>,
    /// Matches username or e-mail
    pub search: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: UserRole) -> User {
        User::new("ana".into(), "Ana@Example.com ".into(), "hash".into(), role)
    }

    #[test]
    fn test_role_roundtrip() {
        for role in [UserRole::Admin, UserRole::Moderator, UserRole::Member] {
            assert_eq!(role.to_string().parse::<UserRole>().unwrap(), role);
        }
        assert!("editor".parse::<UserRole>().is_err());
        assert_eq!("BANNED".parse::<UserStatus>().unwrap(), UserStatus::Banned);
    }

    #[test]
    fn test_permissions_by_role() {
        let admin = user(UserRole::Admin);
        let moderator = user(UserRole::Moderator);
        let member = user(UserRole::Member);

        for permission in Permission::ALL {
            assert!(admin.has_permission(*permission));
        }
        assert!(moderator.has_permission(Permission::ModerateStories));
        assert!(moderator.has_permission(Permission::ModerateComments));
        assert!(!moderator.has_permission(Permission::ManageUsers));
        assert!(!member.has_permission(Permission::ModerateStories));
        assert!(moderator.is_staff());
        assert!(!member.is_staff());
    }

    #[test]
    fn test_banned_user_has_no_permissions() {
        let mut admin = user(UserRole::Admin);
        admin.status = UserStatus::Banned;
        assert!(!admin.has_permission(Permission::ModerateStories));
        assert!(!admin.is_staff());
    }

    #[test]
    fn test_public_name_falls_back_to_username() {
        let mut u = user(UserRole::Member);
        assert_eq!(u.public_name(), "ana");
        u.display_name = Some("  ".into());
        assert_eq!(u.public_name(), "ana");
        u.display_name = Some("Ana María".into());
        assert_eq!(u.public_name(), "Ana María");
    }

    #[test]
    fn test_gravatar_normalizes_email() {
        assert_eq!(gravatar_url("ana@example.com"), user(UserRole::Member).avatar_url());
        assert!(gravatar_url("x@y.z").starts_with("https://www.gravatar.com/avatar/"));
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let json = serde_json::to_value(user(UserRole::Member)).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "member");
    }
}
