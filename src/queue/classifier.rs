//! Urgency classification of a single conversation snapshot.
//!
//! Pure and deterministic: no I/O, never fails, never mutates its input.
//! Missing data degrades towards the least urgent category.

use crate::models::conversation::{Conversation, MessageKind};
use crate::models::summary::{Category, ClassifiedSummary};

/// Number of trailing messages scanned for unread customer messages.
///
/// Bounds classification cost. Conversations with more unread messages
/// than this undercount; the queue only needs "has unread", not the exact
/// total.
pub const UNREAD_WINDOW: usize = 10;

/// Window size at or above which a queued conversation is considered busy.
pub const BUSY_WINDOW_THRESHOLD: usize = 5;

/// Maximum characters kept from the latest message.
pub const PREVIEW_CHARS: usize = 50;

/// Preview shown when the latest message is an image.
pub const IMAGE_PREVIEW: &str = "[image]";

/// Classify a conversation snapshot.
///
/// Precedence, first match wins: panic room, unread customer messages,
/// open reminder, idle.
#[must_use]
pub fn classify(conversation: &Conversation) -> ClassifiedSummary {
    let window_start = conversation.messages.len().saturating_sub(UNREAD_WINDOW);
    let window = &conversation.messages[window_start..];
    let unread_count = window.iter().filter(|m| m.is_unread()).count();

    let (category, priority_score) = if conversation.is_in_panic_room {
        (Category::Panic, Category::Panic.base_priority())
    } else if unread_count > 0 {
        let priority = if window.len() >= BUSY_WINDOW_THRESHOLD {
            3
        } else {
            Category::Queue.base_priority()
        };
        (Category::Queue, priority)
    } else if conversation.has_open_reminder() {
        (Category::Reminder, Category::Reminder.base_priority())
    } else {
        (Category::Idle, Category::Idle.base_priority())
    };

    ClassifiedSummary {
        conversation_id: conversation.id.clone(),
        category,
        priority_score,
        unread_count,
        last_message_preview: preview(conversation),
        updated_at: conversation.updated_at,
    }
}

fn preview(conversation: &Conversation) -> String {
    match conversation.last_message() {
        None => String::new(),
        Some(message) if message.kind == MessageKind::Image => IMAGE_PREVIEW.to_owned(),
        Some(message) => truncate_chars(&message.content, PREVIEW_CHARS),
    }
}

/// Keep at most `max` characters; no ellipsis, no padding.
fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_owned(),
        None => text.to_owned(),
    }
}
