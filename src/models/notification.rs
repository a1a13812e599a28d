//! Notification model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// What a notification is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// A story waits for review (sent to staff)
    StorySubmitted,
    StoryApproved,
    StoryRejected,
    StoryUnpublished,
    /// Someone translated the user's story
    StoryTranslated,
    /// Someone commented on the user's story
    StoryCommented,
    /// Someone replied to the user's comment
    CommentReplied,
    /// The user's role changed
    RoleChanged,
    System,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StorySubmitted => "story_submitted",
            Self::StoryApproved => "story_approved",
            Self::StoryRejected => "story_rejected",
            Self::StoryUnpublished => "story_unpublished",
            Self::StoryTranslated => "story_translated",
            Self::StoryCommented => "story_commented",
            Self::CommentReplied => "comment_replied",
            Self::RoleChanged => "role_changed",
            Self::System => "system",
        }
    }
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "story_submitted" => Ok(Self::StorySubmitted),
            "story_approved" => Ok(Self::StoryApproved),
            "story_rejected" => Ok(Self::StoryRejected),
            "story_unpublished" => Ok(Self::StoryUnpublished),
            "story_translated" => Ok(Self::StoryTranslated),
            "story_commented" => Ok(Self::StoryCommented),
            "comment_replied" => Ok(Self::CommentReplied),
            "role_changed" => Ok(Self::RoleChanged),
            "system" => Ok(Self::System),
            _ => Err(anyhow::anyhow!("Invalid notification kind: {}", s)),
        }
    }
}

/// In-app notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: i64,
    pub user_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Site-relative link to the subject
    pub link: Option<String>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Row data for a new notification
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: i64,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub link: Option<String>,
}

impl NewNotification {
    pub fn new(
        user_id: i64,
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            kind,
            title: title.into(),
            message: message.into(),
            link: None,
        }
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip() {
        let kinds = [
            NotificationKind::StorySubmitted,
            NotificationKind::StoryApproved,
            NotificationKind::StoryRejected,
            NotificationKind::StoryUnpublished,
            NotificationKind::StoryTranslated,
            NotificationKind::StoryCommented,
            NotificationKind::CommentReplied,
            NotificationKind::RoleChanged,
            NotificationKind::System,
        ];
        for kind in kinds {
            assert_eq!(kind.as_str().parse::<NotificationKind>().unwrap(), kind);
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
        }
    }
}
