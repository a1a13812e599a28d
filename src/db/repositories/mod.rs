//! Database repositories
//!
//! Repository pattern implementations for database access.
//! Each repository handles the queries for one entity and works on both
//! SQLite and MySQL through `with_pool!`.

pub mod category;
pub mod comment;
pub mod notification;
pub mod session;
pub mod settings;
pub mod stats;
pub mod story;
pub mod tag;
pub mod translation;
pub mod user;

pub use category::{CategoryRepository, SqlxCategoryRepository};
pub use comment::{CommentRepository, SqlxCommentRepository};
pub use notification::{NotificationRepository, SqlxNotificationRepository};
pub use session::{
    LoginLogRepository, SessionRepository, SqlxLoginLogRepository, SqlxSessionRepository,
};
pub use settings::{Setting, SettingsRepository, SqlxSettingsRepository};
pub use stats::{SqlxStatisticsRepository, StatisticsRepository};
pub use story::{SqlxStoryRepository, StatusChange, StoryRepository};
pub use tag::{SqlxTagRepository, TagRepository};
pub use translation::{SqlxTranslationRepository, TranslationRepository};
pub use user::{SqlxUserRepository, UserRepository};
