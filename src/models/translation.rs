//! Interface translation model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One interface string in one language
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Translation {
    pub id: i64,
    /// Dotted message key, e.g. `nav.home`
    pub key: String,
    pub language: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Number of translated keys per language
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LanguageCoverage {
    pub language: String,
    pub translated: i64,
    pub total: i64,
}
