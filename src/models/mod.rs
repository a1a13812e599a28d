//! Data models
//!
//! This module contains all data structures used throughout StoryShare.
//! Models represent:
//! - Database entities (User, Session, Story, StoryContent, Comment, ...)
//! - API request inputs
//! - Pagination helpers

mod category;
mod comment;
mod notification;
mod pagination;
mod session;
mod statistics;
mod story;
mod tag;
mod translation;
mod user;

pub use category::{Category, CategoryWithCount, CreateCategoryInput, UpdateCategoryInput};
pub use comment::{Comment, CommentStatus, CommentWithAuthor, CreateCommentInput, NewComment};
pub use notification::{NewNotification, Notification, NotificationKind};
pub use pagination::{ListParams, PagedResult};
pub use session::{ClientInfo, LoginLog, Session};
pub use statistics::{
    CommentStatistics, LanguageCount, SiteStatistics, StoryStatistics, SystemStatistics, TopStory,
    UserStatistics,
};
pub use story::{
    AccessLevel, CreateStoryInput, NewStory, NewStoryContent, Story, StoryContent, StoryFilter,
    StoryStatus, StorySummary, StoryView, TranslationInput, UpdateStoryInput,
};
pub use tag::{Tag, TagWithCount};
pub use translation::{LanguageCoverage, Translation};
pub use user::{
    gravatar_url, CreateUserInput, Permission, UpdateProfileInput, User, UserFilter, UserRole,
    UserStatus,
};
