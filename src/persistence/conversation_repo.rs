//! Conversation repository for `SQLite` persistence.
//!
//! Doubles as the queue engine's [`ConversationStore`]: the candidate
//! predicate and the per-conversation message window are evaluated in SQL.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::conversation::{
    Conversation, ConversationStatus, Message, MessageKind, Sender,
};
use crate::models::listing::ListingFilter;
use crate::queue::store::{CandidateFilter, ConversationStore};
use crate::{AppError, Result};

use super::db::Database;

/// Candidate predicate of the live queue. `?1` = recency bound, `?2` = partner or NULL.
const CANDIDATE_PREDICATE: &str = "(c.status IN ('new','assigned','active') \
     OR c.in_panic_room = 1 \
     OR (c.updated_at >= ?1 AND c.status != 'completed')) \
     AND (?2 IS NULL OR c.scope_ref = ?2)";

/// Listing predicate. `?1` = status or NULL, `?2` = partner or NULL, `?3` = panic only.
const LISTING_PREDICATE: &str = "(?1 IS NULL OR c.status = ?1) \
     AND (?2 IS NULL OR c.scope_ref = ?2) \
     AND (?3 = 0 OR c.in_panic_room = 1)";

const CONVERSATION_COLUMNS: &str =
    "c.id, c.status, c.in_panic_room, c.reminder_active, c.reminder_handled, c.scope_ref, c.updated_at";

/// Repository for conversation and message records.
#[derive(Clone)]
pub struct ConversationRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: String,
    status: String,
    in_panic_room: i64,
    reminder_active: i64,
    reminder_handled: i64,
    scope_ref: Option<String>,
    updated_at: String,
}

impl ConversationRow {
    fn into_conversation(self, messages: Vec<Message>) -> Result<Conversation> {
        Ok(Conversation {
            status: parse_status(&self.status)?,
            is_in_panic_room: self.in_panic_room != 0,
            reminder_active: self.reminder_active != 0,
            reminder_handled: self.reminder_handled != 0,
            messages,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
            scope_ref: self.scope_ref,
            id: self.id,
        })
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    conversation_id: String,
    sender: String,
    kind: String,
    content: String,
    sent_at: String,
    read_by_agent: i64,
}

impl MessageRow {
    fn into_message(self) -> Result<(String, Message)> {
        let message = Message {
            sender: parse_sender(&self.sender)?,
            kind: parse_kind(&self.kind)?,
            content: self.content,
            timestamp: parse_timestamp(&self.sent_at, "sent_at")?,
            read_by_agent: self.read_by_agent != 0,
        };
        Ok((self.conversation_id, message))
    }
}

fn parse_status(s: &str) -> Result<ConversationStatus> {
    match s {
        "new" => Ok(ConversationStatus::New),
        "assigned" => Ok(ConversationStatus::Assigned),
        "active" => Ok(ConversationStatus::Active),
        "completed" => Ok(ConversationStatus::Completed),
        "closed" => Ok(ConversationStatus::Closed),
        other => Err(AppError::Db(format!("invalid conversation status: {other}"))),
    }
}

fn status_str(s: ConversationStatus) -> &'static str {
    match s {
        ConversationStatus::New => "new",
        ConversationStatus::Assigned => "assigned",
        ConversationStatus::Active => "active",
        ConversationStatus::Completed => "completed",
        ConversationStatus::Closed => "closed",
    }
}

fn parse_sender(s: &str) -> Result<Sender> {
    match s {
        "customer" => Ok(Sender::Customer),
        "agent" => Ok(Sender::Agent),
        other => Err(AppError::Db(format!("invalid message sender: {other}"))),
    }
}

fn sender_str(s: Sender) -> &'static str {
    match s {
        Sender::Customer => "customer",
        Sender::Agent => "agent",
    }
}

fn parse_kind(s: &str) -> Result<MessageKind> {
    match s {
        "text" => Ok(MessageKind::Text),
        "image" => Ok(MessageKind::Image),
        other => Err(AppError::Db(format!("invalid message kind: {other}"))),
    }
}

fn kind_str(k: MessageKind) -> &'static str {
    match k {
        MessageKind::Text => "text",
        MessageKind::Image => "image",
    }
}

/// Fixed-width UTC format so lexicographic order equals time order in SQL.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

fn window_limit(message_window: usize) -> i64 {
    i64::try_from(message_window).unwrap_or(i64::MAX)
}

/// Attach each conversation's messages, keeping the conversation order.
fn assemble(rows: Vec<ConversationRow>, messages: Vec<MessageRow>) -> Result<Vec<Conversation>> {
    let mut by_conversation: HashMap<String, Vec<Message>> = HashMap::new();
    for row in messages {
        let (conversation_id, message) = row.into_message()?;
        by_conversation
            .entry(conversation_id)
            .or_default()
            .push(message);
    }

    rows.into_iter()
        .map(|row| {
            let messages = by_conversation.remove(&row.id).unwrap_or_default();
            row.into_conversation(messages)
        })
        .collect()
}

impl ConversationRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a conversation together with any messages it already carries.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, conversation: &Conversation) -> Result<Conversation> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO conversation
                (id, status, in_panic_room, reminder_active, reminder_handled, scope_ref, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(&conversation.id)
        .bind(status_str(conversation.status))
        .bind(i64::from(conversation.is_in_panic_room))
        .bind(i64::from(conversation.reminder_active))
        .bind(i64::from(conversation.reminder_handled))
        .bind(&conversation.scope_ref)
        .bind(format_timestamp(conversation.updated_at))
        .execute(&mut *tx)
        .await?;

        for message in &conversation.messages {
            insert_message(&mut *tx, &conversation.id, message).await?;
        }

        tx.commit().await?;
        Ok(conversation.clone())
    }

    /// Retrieve a conversation with its full message history.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the conversation does not exist.
    pub async fn get_by_id(&self, id: &str) -> Result<Conversation> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversation c WHERE c.id = ?1"
        ))
        .bind(id)
        .fetch_optional(self.db.as_ref())
        .await?;
        let row = row.ok_or_else(|| AppError::NotFound(format!("conversation {id}")))?;

        let messages: Vec<MessageRow> = sqlx::query_as(
            "SELECT conversation_id, sender, kind, content, sent_at, read_by_agent
             FROM message WHERE conversation_id = ?1 ORDER BY id ASC",
        )
        .bind(id)
        .fetch_all(self.db.as_ref())
        .await?;

        let mut assembled = assemble(vec![row], messages)?;
        assembled
            .pop()
            .ok_or_else(|| AppError::NotFound(format!("conversation {id}")))
    }

    /// Append a message and bump `updated_at` in one transaction.
    ///
    /// With `mark_read`, earlier customer messages are flipped to read in
    /// the same transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the conversation does not exist, or
    /// `AppError::Db` if the insert fails.
    pub async fn append_message(
        &self,
        id: &str,
        message: &Message,
        mark_read: bool,
    ) -> Result<Committed> {
        let mut tx = self.db.begin().await?;
        let committed = touch(&mut *tx, id, message.timestamp.max(Utc::now())).await?;
        insert_message(&mut *tx, id, message).await?;
        if mark_read {
            mark_customer_messages_read(&mut *tx, id).await?;
        }
        tx.commit().await?;
        Ok(committed)
    }

    /// Flip every unread customer message to read.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the conversation does not exist, or
    /// `AppError::Db` if the update fails.
    pub async fn mark_read(&self, id: &str) -> Result<Committed> {
        let mut tx = self.db.begin().await?;
        let committed = touch(&mut *tx, id, Utc::now()).await?;
        mark_customer_messages_read(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(committed)
    }

    /// Move a conversation into or out of the panic room.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the conversation does not exist, or
    /// `AppError::Db` if the update fails.
    pub async fn set_panic_room(&self, id: &str, in_panic_room: bool) -> Result<Committed> {
        self.update_returning(
            id,
            "UPDATE conversation SET in_panic_room = ?2, updated_at = MAX(updated_at, ?3) \
             WHERE id = ?1 RETURNING scope_ref",
            i64::from(in_panic_room),
        )
        .await
    }

    /// Arm or disarm the follow-up reminder. Arming clears the handled flag.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the conversation does not exist, or
    /// `AppError::Db` if the update fails.
    pub async fn set_reminder(&self, id: &str, active: bool) -> Result<Committed> {
        self.update_returning(
            id,
            "UPDATE conversation SET reminder_active = ?2, reminder_handled = 0, \
             updated_at = MAX(updated_at, ?3) WHERE id = ?1 RETURNING scope_ref",
            i64::from(active),
        )
        .await
    }

    /// Mark the pending reminder as handled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the conversation does not exist, or
    /// `AppError::Db` if the update fails.
    pub async fn handle_reminder(&self, id: &str) -> Result<Committed> {
        self.update_returning(
            id,
            "UPDATE conversation SET reminder_handled = ?2, updated_at = MAX(updated_at, ?3) \
             WHERE id = ?1 RETURNING scope_ref",
            1_i64,
        )
        .await
    }

    /// Change the lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the conversation does not exist, or
    /// `AppError::Db` if the update fails.
    pub async fn update_status(&self, id: &str, status: ConversationStatus) -> Result<Committed> {
        self.update_returning(
            id,
            "UPDATE conversation SET status = ?2, updated_at = MAX(updated_at, ?3) \
             WHERE id = ?1 RETURNING scope_ref",
            status_str(status),
        )
        .await
    }

    async fn update_returning<'q, T>(&self, id: &str, sql: &'q str, value: T) -> Result<Committed>
    where
        T: 'q + Send + sqlx::Encode<'q, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
    {
        let scope_ref = sqlx::query_scalar::<sqlx::Sqlite, Option<String>>(sql)
            .bind(id.to_owned())
            .bind(value)
            .bind(format_timestamp(Utc::now()))
            .fetch_optional(self.db.as_ref())
            .await?;
        committed(id, scope_ref)
    }
}

/// Receipt of a committed write: enough to invalidate without reloading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed {
    /// Written conversation.
    pub conversation_id: String,
    /// Its partner sub-scope, read back in the same statement.
    pub scope_ref: Option<String>,
}

fn committed(id: &str, scope_ref: Option<Option<String>>) -> Result<Committed> {
    scope_ref
        .map(|scope_ref| Committed {
            conversation_id: id.to_owned(),
            scope_ref,
        })
        .ok_or_else(|| AppError::NotFound(format!("conversation {id}")))
}

async fn touch(
    conn: &mut sqlx::SqliteConnection,
    id: &str,
    at: DateTime<Utc>,
) -> Result<Committed> {
    let scope_ref = sqlx::query_scalar::<sqlx::Sqlite, Option<String>>(
        "UPDATE conversation SET updated_at = MAX(updated_at, ?2) WHERE id = ?1 RETURNING scope_ref",
    )
    .bind(id)
    .bind(format_timestamp(at))
    .fetch_optional(&mut *conn)
    .await?;
    committed(id, scope_ref)
}

async fn mark_customer_messages_read(conn: &mut sqlx::SqliteConnection, id: &str) -> Result<()> {
    sqlx::query(
        "UPDATE message SET read_by_agent = 1
         WHERE conversation_id = ?1 AND sender = 'customer' AND read_by_agent = 0",
    )
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_message(
    conn: &mut sqlx::SqliteConnection,
    conversation_id: &str,
    message: &Message,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO message (conversation_id, sender, kind, content, sent_at, read_by_agent)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )
    .bind(conversation_id)
    .bind(sender_str(message.sender))
    .bind(kind_str(message.kind))
    .bind(&message.content)
    .bind(format_timestamp(message.timestamp))
    .bind(i64::from(message.read_by_agent))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl ConversationStore for ConversationRepo {
    async fn fetch_candidates(&self, filter: &CandidateFilter) -> Result<Vec<Conversation>> {
        let active_since = format_timestamp(filter.active_since);
        let partner = filter.scope.partner_id().map(|p| p.as_str().to_owned());

        // One read transaction: conversations and their windows come from the same snapshot.
        let mut tx = self.db.begin().await?;

        let rows: Vec<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversation c
             WHERE {CANDIDATE_PREDICATE}
             ORDER BY c.rowid ASC"
        ))
        .bind(&active_since)
        .bind(&partner)
        .fetch_all(&mut *tx)
        .await?;

        let messages: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT conversation_id, sender, kind, content, sent_at, read_by_agent FROM (
                 SELECT m.*, ROW_NUMBER() OVER (
                     PARTITION BY m.conversation_id ORDER BY m.id DESC
                 ) AS rn
                 FROM message m JOIN conversation c ON c.id = m.conversation_id
                 WHERE {CANDIDATE_PREDICATE}
             )
             WHERE rn <= ?3
             ORDER BY conversation_id, id ASC"
        ))
        .bind(&active_since)
        .bind(&partner)
        .bind(window_limit(filter.message_window))
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        assemble(rows, messages)
    }

    async fn fetch_listing(
        &self,
        filter: &ListingFilter,
        message_window: usize,
    ) -> Result<Vec<Conversation>> {
        let status = filter.status.map(status_str);
        let partner = filter.partner.as_ref().map(|p| p.as_str().to_owned());
        let panic_only = i64::from(filter.panic_only);
        let limit = i64::from(filter.limit);

        let mut tx = self.db.begin().await?;

        let rows: Vec<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversation c
             WHERE {LISTING_PREDICATE}
             ORDER BY c.updated_at DESC, c.rowid ASC
             LIMIT ?4"
        ))
        .bind(status)
        .bind(&partner)
        .bind(panic_only)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let messages: Vec<MessageRow> = sqlx::query_as(&format!(
            "SELECT conversation_id, sender, kind, content, sent_at, read_by_agent FROM (
                 SELECT m.*, ROW_NUMBER() OVER (
                     PARTITION BY m.conversation_id ORDER BY m.id DESC
                 ) AS rn
                 FROM message m
                 WHERE m.conversation_id IN (
                     SELECT c.id FROM conversation c
                     WHERE {LISTING_PREDICATE}
                     ORDER BY c.updated_at DESC, c.rowid ASC
                     LIMIT ?4
                 )
             )
             WHERE rn <= ?5
             ORDER BY conversation_id, id ASC"
        ))
        .bind(status)
        .bind(&partner)
        .bind(panic_only)
        .bind(limit)
        .bind(window_limit(message_window))
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        assemble(rows, messages)
    }
}
