//! `SQLite` schema bootstrap logic.
//!
//! Every statement is idempotent and runs on each startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply the conversation and message tables to the connected database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS conversation (
    id               TEXT PRIMARY KEY NOT NULL,
    status           TEXT NOT NULL CHECK(status IN ('new','assigned','active','completed','closed')),
    in_panic_room    INTEGER NOT NULL DEFAULT 0,
    reminder_active  INTEGER NOT NULL DEFAULT 0,
    reminder_handled INTEGER NOT NULL DEFAULT 0,
    scope_ref        TEXT,
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS message (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id  TEXT NOT NULL REFERENCES conversation(id),
    sender           TEXT NOT NULL CHECK(sender IN ('customer','agent')),
    kind             TEXT NOT NULL CHECK(kind IN ('text','image')),
    content          TEXT NOT NULL,
    sent_at          TEXT NOT NULL,
    read_by_agent    INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_conversation_status ON conversation(status);
CREATE INDEX IF NOT EXISTS idx_conversation_updated ON conversation(updated_at);
CREATE INDEX IF NOT EXISTS idx_conversation_scope ON conversation(scope_ref);
CREATE INDEX IF NOT EXISTS idx_message_conversation ON message(conversation_id, id);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
