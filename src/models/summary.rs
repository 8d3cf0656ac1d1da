//! Classified summary produced for every queue read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Urgency bucket assigned by the classifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Escalated into the panic room.
    Panic,
    /// Customer messages waiting for an agent.
    Queue,
    /// Pending follow-up that nobody handled yet.
    Reminder,
    /// Nothing to do right now.
    Idle,
}

impl Category {
    /// Fixed priority attached to the category.
    ///
    /// `Queue` is refined by the classifier (2 or 3) depending on how busy
    /// the message window is; this returns the base value.
    #[must_use]
    pub fn base_priority(self) -> u8 {
        match self {
            Self::Panic => 5,
            Self::Queue => 2,
            Self::Reminder => 1,
            Self::Idle => 0,
        }
    }
}

/// Derived, ephemeral per-conversation record. Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifiedSummary {
    /// Source conversation.
    pub conversation_id: String,
    /// Urgency bucket.
    pub category: Category,
    /// One of 0, 1, 2, 3 or 5; higher sorts first.
    pub priority_score: u8,
    /// Unread customer messages inside the scanned window.
    pub unread_count: usize,
    /// Short preview of the latest message; empty when there are no messages.
    pub last_message_preview: String,
    /// Copied through from the conversation.
    pub updated_at: DateTime<Utc>,
}
