//! Conversation write path: commit the mutation, then invalidate.
//!
//! Every operation persists through [`ConversationRepo`] first and calls
//! the invalidation hook as soon as the write has committed, before the
//! updated conversation is reloaded. A failed reload still leaves the
//! cache evicted.

use tracing::{info, info_span, Instrument};

use crate::cache::invalidation::{affected_scopes, scopes_for, InvalidationHook};
use crate::models::conversation::{Conversation, ConversationStatus, Message, MessageKind, Sender};
use crate::persistence::conversation_repo::{Committed, ConversationRepo};
use crate::{AppError, Result};

/// Longest message body accepted from callers.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Mutating operations on conversations.
#[derive(Clone)]
pub struct ConversationManager {
    repo: ConversationRepo,
    hook: InvalidationHook,
}

impl ConversationManager {
    /// Bind the manager to its repository and invalidation hook.
    #[must_use]
    pub fn new(repo: ConversationRepo, hook: InvalidationHook) -> Self {
        Self { repo, hook }
    }

    /// Load a conversation with its full message history.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown conversation, or `AppError::Db`.
    pub async fn fetch(&self, conversation_id: &str) -> Result<Conversation> {
        self.repo.get_by_id(conversation_id).await
    }

    /// Open a new conversation, optionally tied to a conversation partner.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn open(&self, scope_ref: Option<String>) -> Result<Conversation> {
        let conversation = Conversation::new(scope_ref);
        let span = info_span!("open_conversation", conversation_id = %conversation.id);
        async {
            let created = self.repo.create(&conversation).await?;
            self.hook.on_mutation(&affected_scopes(&created));
            info!("conversation opened");
            Ok(created)
        }
        .instrument(span)
        .await
    }

    /// Append a message. An agent reply also marks earlier customer
    /// messages as read, in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an empty or oversized text body,
    /// `AppError::NotFound` for an unknown conversation, or `AppError::Db`.
    pub async fn post_message(&self, conversation_id: &str, message: Message) -> Result<Conversation> {
        validate_message(&message)?;
        let span = info_span!("post_message", conversation_id, sender = ?message.sender);
        async {
            let agent_reply = message.sender == Sender::Agent;
            let committed = self
                .repo
                .append_message(conversation_id, &message, agent_reply)
                .await?;
            info!("message posted");
            self.after_commit(committed).await
        }
        .instrument(span)
        .await
    }

    /// Flip the read receipt on every unread customer message.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown conversation, or `AppError::Db`.
    pub async fn mark_read(&self, conversation_id: &str) -> Result<Conversation> {
        let committed = self
            .repo
            .mark_read(conversation_id)
            .instrument(info_span!("mark_read", conversation_id))
            .await?;
        self.after_commit(committed).await
    }

    /// Escalate into the panic room.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown conversation, or `AppError::Db`.
    pub async fn enter_panic_room(&self, conversation_id: &str) -> Result<Conversation> {
        self.set_panic_room(conversation_id, true).await
    }

    /// Release from the panic room.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown conversation, or `AppError::Db`.
    pub async fn exit_panic_room(&self, conversation_id: &str) -> Result<Conversation> {
        self.set_panic_room(conversation_id, false).await
    }

    /// Arm (or disarm) the follow-up reminder.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown conversation, or `AppError::Db`.
    pub async fn set_reminder(&self, conversation_id: &str, active: bool) -> Result<Conversation> {
        let committed = self.repo.set_reminder(conversation_id, active).await?;
        info!(conversation_id, active, "reminder updated");
        self.after_commit(committed).await
    }

    /// Resolve the pending follow-up reminder.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown conversation, or `AppError::Db`.
    pub async fn handle_reminder(&self, conversation_id: &str) -> Result<Conversation> {
        let committed = self.repo.handle_reminder(conversation_id).await?;
        info!(conversation_id, "reminder handled");
        self.after_commit(committed).await
    }

    /// Move the conversation to another lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for an unknown conversation, or `AppError::Db`.
    pub async fn set_status(
        &self,
        conversation_id: &str,
        status: ConversationStatus,
    ) -> Result<Conversation> {
        let committed = self.repo.update_status(conversation_id, status).await?;
        info!(conversation_id, ?status, "status changed");
        self.after_commit(committed).await
    }

    async fn set_panic_room(&self, conversation_id: &str, in_panic_room: bool) -> Result<Conversation> {
        let committed = self.repo.set_panic_room(conversation_id, in_panic_room).await?;
        info!(conversation_id, in_panic_room, "panic room updated");
        self.after_commit(committed).await
    }

    /// Invalidate first, then reload.
    async fn after_commit(&self, committed: Committed) -> Result<Conversation> {
        self.hook
            .on_mutation(&scopes_for(committed.scope_ref.as_deref()));
        self.repo.get_by_id(&committed.conversation_id).await
    }
}

fn validate_message(message: &Message) -> Result<()> {
    if message.kind == MessageKind::Text && message.content.trim().is_empty() {
        return Err(AppError::Validation("message content is empty".into()));
    }
    if message.content.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::Validation(format!(
            "message content exceeds {MAX_MESSAGE_CHARS} characters"
        )));
    }
    Ok(())
}
