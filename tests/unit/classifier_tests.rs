//! Unit tests for conversation classification.
//!
//! Covers category precedence, priority scores, the unread window, and
//! preview rendering, including degraded records with missing fields.

use support_desk::models::conversation::{ConversationStatus, MessageKind};
use support_desk::models::summary::Category;
use support_desk::queue::classifier::{classify, IMAGE_PREVIEW, PREVIEW_CHARS, UNREAD_WINDOW};

use super::fixtures::{agent, conversation, customer, history};

// ── Category precedence ─────────────────────────────────────────────────────

/// Panic room wins over unread messages and open reminders.
#[test]
fn panic_room_outranks_everything() {
    let mut c = conversation("c-1", ConversationStatus::Active);
    c.is_in_panic_room = true;
    c.reminder_active = true;
    c.messages = history(6, 4);

    let summary = classify(&c);

    assert_eq!(summary.category, Category::Panic);
    assert_eq!(summary.priority_score, 5);
    assert_eq!(summary.unread_count, 4);
}

/// Unread customer messages outrank an open reminder.
#[test]
fn unread_outranks_reminder() {
    let mut c = conversation("c-1", ConversationStatus::Active);
    c.reminder_active = true;
    c.messages = vec![customer("hello?", false)];

    let summary = classify(&c);

    assert_eq!(summary.category, Category::Queue);
    assert_eq!(summary.priority_score, 2);
}

/// An active, unhandled reminder without unread messages is a reminder.
#[test]
fn open_reminder_without_unread() {
    let mut c = conversation("c-1", ConversationStatus::Active);
    c.reminder_active = true;
    c.messages = vec![customer("thanks", true), agent("will check back")];

    let summary = classify(&c);

    assert_eq!(summary.category, Category::Reminder);
    assert_eq!(summary.priority_score, 1);
    assert_eq!(summary.unread_count, 0);
}

/// A handled reminder no longer counts.
#[test]
fn handled_reminder_is_idle() {
    let mut c = conversation("c-1", ConversationStatus::Active);
    c.reminder_active = true;
    c.reminder_handled = true;

    let summary = classify(&c);

    assert_eq!(summary.category, Category::Idle);
    assert_eq!(summary.priority_score, 0);
}

/// Unread agent messages are ignored; only customer messages count.
#[test]
fn agent_messages_never_count_as_unread() {
    let mut c = conversation("c-1", ConversationStatus::Active);
    let mut reply = agent("on it");
    reply.read_by_agent = false;
    c.messages = vec![reply];

    let summary = classify(&c);

    assert_eq!(summary.category, Category::Idle);
    assert_eq!(summary.unread_count, 0);
}

// ── Priority scores ─────────────────────────────────────────────────────────

/// Every summary carries the score its category maps to.
#[test]
fn priority_is_consistent_with_category() {
    let mut panic = conversation("p", ConversationStatus::Active);
    panic.is_in_panic_room = true;
    let mut quiet_queue = conversation("q2", ConversationStatus::Active);
    quiet_queue.messages = history(3, 1);
    let mut busy_queue = conversation("q3", ConversationStatus::Active);
    busy_queue.messages = history(8, 2);
    let mut reminder = conversation("r", ConversationStatus::Active);
    reminder.reminder_active = true;
    let idle = conversation("i", ConversationStatus::Active);

    for c in [&panic, &quiet_queue, &busy_queue, &reminder, &idle] {
        let summary = classify(c);
        let allowed: &[u8] = match summary.category {
            Category::Panic => &[5],
            Category::Queue => &[2, 3],
            Category::Reminder => &[1],
            Category::Idle => &[0],
        };
        assert!(
            allowed.contains(&summary.priority_score),
            "{} scored {} as {:?}",
            c.id,
            summary.priority_score,
            summary.category
        );
    }
}

/// A queued conversation with five or more messages in the window is busy.
#[test]
fn busy_window_raises_queue_priority() {
    let mut c = conversation("c-1", ConversationStatus::Active);
    c.messages = history(5, 1);
    assert_eq!(classify(&c).priority_score, 3);

    c.messages = history(4, 1);
    assert_eq!(classify(&c).priority_score, 2);
}

/// Six messages with three unread: busy queue entry.
#[test]
fn six_messages_three_unread_is_priority_three() {
    let mut c = conversation("b", ConversationStatus::Active);
    c.messages = history(6, 3);

    let summary = classify(&c);

    assert_eq!(summary.category, Category::Queue);
    assert_eq!(summary.priority_score, 3);
    assert_eq!(summary.unread_count, 3);
}

// ── Unread window ───────────────────────────────────────────────────────────

/// Twelve unread messages are reported as at most the window size.
#[test]
fn unread_count_is_bounded_by_window() {
    let mut c = conversation("c-1", ConversationStatus::Active);
    c.messages = history(12, 12);

    let summary = classify(&c);

    assert_eq!(summary.category, Category::Queue);
    assert_eq!(summary.unread_count, UNREAD_WINDOW);
}

/// Unread messages older than the window are not seen.
#[test]
fn unread_outside_window_is_ignored() {
    let mut c = conversation("c-1", ConversationStatus::Active);
    let mut messages = vec![customer("very old", false)];
    messages.extend(history(UNREAD_WINDOW, 0));
    c.messages = messages;

    let summary = classify(&c);

    assert_eq!(summary.category, Category::Idle);
    assert_eq!(summary.unread_count, 0);
}

// ── Preview ─────────────────────────────────────────────────────────────────

/// Long text is truncated to the preview length without an ellipsis.
#[test]
fn preview_truncates_long_text() {
    let mut c = conversation("c-1", ConversationStatus::Active);
    c.messages = vec![customer(&"x".repeat(80), false)];

    let preview = classify(&c).last_message_preview;

    assert_eq!(preview.chars().count(), PREVIEW_CHARS);
    assert!(!preview.ends_with('…'));
}

/// Image messages render as a placeholder.
#[test]
fn preview_of_image_is_placeholder() {
    let mut c = conversation("c-1", ConversationStatus::Active);
    let mut image = customer("s3://bucket/photo.png", false);
    image.kind = MessageKind::Image;
    c.messages = vec![customer("look at this", true), image];

    assert_eq!(classify(&c).last_message_preview, IMAGE_PREVIEW);
}

/// No messages yields an empty preview.
#[test]
fn preview_empty_without_messages() {
    let c = conversation("c-1", ConversationStatus::New);
    assert_eq!(classify(&c).last_message_preview, "");
}

// ── Degraded records ────────────────────────────────────────────────────────

/// A record missing flags and messages deserializes with defaults and
/// classifies as idle without panicking.
#[test]
fn missing_fields_degrade_to_idle() {
    let c = serde_json::from_str(
        r#"{"id":"c-9","status":"active","updated_at":"2026-01-01T00:00:00Z"}"#,
    )
    .expect("partial record parses");

    let summary = classify(&c);

    assert_eq!(summary.category, Category::Idle);
    assert_eq!(summary.priority_score, 0);
    assert_eq!(summary.unread_count, 0);
    assert_eq!(summary.last_message_preview, "");
}

/// Explicit nulls read the same as absent fields.
#[test]
fn null_fields_degrade_to_idle() {
    let c = serde_json::from_str(
        r#"{"id":"c-10","status":"active","updated_at":"2026-01-01T00:00:00Z",
            "is_in_panic_room":null,"reminder_active":null,"reminder_handled":null,
            "messages":null,"scope_ref":null}"#,
    )
    .expect("record with nulls parses");

    let summary = classify(&c);

    assert_eq!(summary.category, Category::Idle);
    assert_eq!(summary.priority_score, 0);
    assert_eq!(summary.unread_count, 0);
    assert_eq!(summary.last_message_preview, "");
}

/// A null message body or read flag counts as empty and unread.
#[test]
fn null_message_fields_use_defaults() {
    let c = serde_json::from_str(
        r#"{"id":"c-11","status":"active","updated_at":"2026-01-01T00:00:00Z",
            "messages":[{"sender":"customer","content":null,"read_by_agent":null,
                         "timestamp":"2026-01-01T00:00:00Z"}]}"#,
    )
    .expect("message with nulls parses");

    let summary = classify(&c);

    assert_eq!(summary.category, Category::Queue);
    assert_eq!(summary.unread_count, 1);
    assert_eq!(summary.last_message_preview, "");
}

/// Identical input always yields an identical summary.
#[test]
fn classify_is_deterministic() {
    let mut panic = conversation("panic", ConversationStatus::Active);
    panic.is_in_panic_room = true;
    panic.messages = vec![customer("help", false), agent("here")];

    let mut queue = conversation("queue", ConversationStatus::Active);
    queue.messages = history(6, 3);

    let mut reminder = conversation("reminder", ConversationStatus::Assigned);
    reminder.reminder_active = true;
    reminder.messages = vec![agent("ping you tomorrow")];

    let idle = conversation("idle", ConversationStatus::New);

    let mut image = customer("uploads/receipt.png", false);
    image.kind = MessageKind::Image;
    let mut picture = conversation("picture", ConversationStatus::Active);
    picture.messages = vec![image];

    for c in [panic, queue, reminder, idle, picture] {
        let first = classify(&c);
        let second = classify(&c);
        assert_eq!(first, second, "{} classified differently", c.id);
    }
}

/// Classification leaves its input untouched.
#[test]
fn classify_does_not_mutate_input() {
    let mut c = conversation("c-1", ConversationStatus::Active);
    c.messages = history(6, 3);
    let before = c.clone();

    let _ = classify(&c);

    assert_eq!(c, before);
}
