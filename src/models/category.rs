//! Category model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Editorial grouping of stories (dialysis, transplant, ...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: i64,
    /// URL-friendly slug (unique)
    pub slug: String,
    pub name: String,
    pub description: Option<String>,
    /// Ascending display order
    pub sort_order: i64,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a category
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCategoryInput {
    pub name: String,
    /// Generated from the name when absent
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sort_order: i64,
}

/// Input for updating a category
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateCategoryInput {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub sort_order: Option<i64>,
}

/// Category with the number of published stories in it
#[derive(Debug, Clone, Serialize)]
pub struct CategoryWithCount {
    #[serde(flatten)]
    pub category: Category,
    pub story_count: i64,
}
