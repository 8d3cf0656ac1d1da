//! Conversation and message models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Lifecycle status of a support conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    /// Opened by a customer, not yet picked up.
    New,
    /// Routed to an agent who has not replied yet.
    Assigned,
    /// Agent and customer are exchanging messages.
    Active,
    /// Resolved by the agent.
    Completed,
    /// Closed without resolution (abandoned, spam, merged).
    Closed,
}

impl ConversationStatus {
    /// Statuses that always qualify as live-queue candidates.
    pub const OPEN: [Self; 3] = [Self::New, Self::Assigned, Self::Active];

    /// Whether the conversation is still waiting on an agent to engage.
    ///
    /// Such conversations stay visible in the queue even when idle.
    #[must_use]
    pub fn awaits_pickup(self) -> bool {
        matches!(self, Self::New | Self::Assigned)
    }
}

/// Author of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// The end customer.
    Customer,
    /// A support agent.
    Agent,
}

/// Payload kind of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Plain text body.
    #[default]
    Text,
    /// Image attachment; `content` holds a storage reference.
    Image,
}

/// A single message inside a conversation. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Author of the message.
    pub sender: Sender,
    /// Payload kind.
    #[serde(default, rename = "type")]
    pub kind: MessageKind,
    /// Text body or attachment reference.
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    /// When the message was sent.
    pub timestamp: DateTime<Utc>,
    /// Whether an agent has seen this message.
    #[serde(default, deserialize_with = "null_as_default")]
    pub read_by_agent: bool,
}

impl Message {
    /// Unread text message from the customer, stamped now.
    #[must_use]
    pub fn from_customer(content: impl Into<String>) -> Self {
        Self {
            sender: Sender::Customer,
            kind: MessageKind::Text,
            content: content.into(),
            timestamp: Utc::now(),
            read_by_agent: false,
        }
    }

    /// Text reply from an agent, stamped now.
    #[must_use]
    pub fn from_agent(content: impl Into<String>) -> Self {
        Self {
            sender: Sender::Agent,
            kind: MessageKind::Text,
            content: content.into(),
            timestamp: Utc::now(),
            read_by_agent: true,
        }
    }

    /// Whether this message still needs an agent's attention.
    #[must_use]
    pub fn is_unread(&self) -> bool {
        self.sender == Sender::Customer && !self.read_by_agent
    }
}

/// Conversation record as exposed by the conversation store.
///
/// Read-only to the queue engine: classification never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    /// Opaque identifier.
    pub id: String,
    /// Current lifecycle status.
    pub status: ConversationStatus,
    /// Flagged for isolated, top-priority escalation handling.
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_in_panic_room: bool,
    /// Pending follow-up flag.
    #[serde(default, deserialize_with = "null_as_default")]
    pub reminder_active: bool,
    /// Resolution flag for the pending follow-up.
    #[serde(default, deserialize_with = "null_as_default")]
    pub reminder_handled: bool,
    /// Messages ordered oldest first. May be a trailing window of the full history.
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<Message>,
    /// Bumped on every write to the conversation.
    pub updated_at: DateTime<Utc>,
    /// Conversation partner sub-scope, if any.
    #[serde(default)]
    pub scope_ref: Option<String>,
}

impl Conversation {
    /// Construct a new conversation with a generated identifier.
    #[must_use]
    pub fn new(scope_ref: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            status: ConversationStatus::New,
            is_in_panic_room: false,
            reminder_active: false,
            reminder_handled: false,
            messages: Vec::new(),
            updated_at: Utc::now(),
            scope_ref,
        }
    }

    /// Most recent message, if any.
    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Whether a follow-up is pending and not yet handled.
    #[must_use]
    pub fn has_open_reminder(&self) -> bool {
        self.reminder_active && !self.reminder_handled
    }
}

/// Treats an explicit `null` like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
