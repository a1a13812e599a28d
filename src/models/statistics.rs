//! Statistics shown on the admin dashboard

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Aggregated community statistics
#[derive(Debug, Clone, Serialize)]
pub struct SiteStatistics {
    pub users: UserStatistics,
    pub stories: StoryStatistics,
    pub comments: CommentStatistics,
    /// Story contents per language
    pub languages: Vec<LanguageCount>,
    /// Most viewed published stories
    pub top_stories: Vec<TopStory>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct UserStatistics {
    pub total: i64,
    pub admins: i64,
    pub moderators: i64,
    pub members: i64,
    pub banned: i64,
    pub verified: i64,
    pub premium: i64,
    /// Registered in the last 30 days
    pub new_recently: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct StoryStatistics {
    pub total: i64,
    pub draft: i64,
    pub pending_review: i64,
    pub published: i64,
    pub rejected: i64,
    pub featured: i64,
    pub total_views: i64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CommentStatistics {
    pub total: i64,
    pub pending: i64,
    pub approved: i64,
    pub rejected: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LanguageCount {
    pub language: String,
    pub contents: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TopStory {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub view_count: i64,
}

/// Host and process figures
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatistics {
    pub version: String,
    pub os_name: String,
    pub memory_bytes: u64,
    pub memory_formatted: String,
    pub system_total_memory: u64,
    pub system_used_memory: u64,
    pub uptime_seconds: u64,
    pub uptime_formatted: String,
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
}
