//! Services layer - Business logic
//!
//! Services enforce the community rules (permissions, moderation workflow,
//! rate limits) and coordinate repositories, cache and notifications.
//! Each service has its own error enum; handlers map those to HTTP.

pub mod backup;
pub mod category;
pub mod comment;
pub mod email;
pub mod i18n;
pub mod markdown;
pub mod notification;
pub mod password;
pub mod rate_limiter;
pub mod settings;
pub mod statistics;
pub mod story;
pub mod tag;
pub mod user;

pub use backup::{BackupError, BackupInfo, DatabaseBackupManager};
pub use category::{generate_slug, CategoryService, CategoryServiceError};
pub use comment::{CommentService, CommentServiceError};
pub use email::EmailService;
pub use i18n::{I18nService, I18nServiceError};
pub use markdown::MarkdownRenderer;
pub use notification::{NotificationService, NotificationServiceError};
pub use password::{hash_password, verify_password};
pub use rate_limiter::{RateAction, RateLimited, RateLimiter};
pub use settings::{SettingsService, SettingsServiceError, SiteSettings};
pub use statistics::{RequestStats, StatisticsService, StatisticsServiceError};
pub use story::{StoryService, StoryServiceError};
pub use tag::{TagService, TagServiceError};
pub use user::{LoginInput, RegisterInput, UserService, UserServiceError};
