//! Tag model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Free-form label attached to stories
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tag {
    pub id: i64,
    /// URL-friendly slug
    pub slug: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Tag with the number of published stories using it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagWithCount {
    #[serde(flatten)]
    pub tag: Tag,
    pub story_count: i64,
}
