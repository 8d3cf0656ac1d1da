//! Read interface the queue engine needs from the conversation store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::conversation::Conversation;
use crate::models::listing::ListingFilter;
use crate::models::scope::Scope;
use crate::Result;

/// Candidate pre-filter pushed down to the store.
///
/// A conversation matches when its status is `new`, `assigned` or `active`,
/// or it sits in the panic room, or it was updated at or after
/// `active_since` and is not `completed`. Within `scope`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFilter {
    /// Scope the read is restricted to.
    pub scope: Scope,
    /// Recency bound for the "recently touched" arm of the predicate.
    pub active_since: DateTime<Utc>,
    /// Trailing messages to load per conversation.
    pub message_window: usize,
}

/// Filtered read access to conversations.
///
/// Implementations return conversations in a stable order (insertion order
/// for the bundled `SQLite` store); that order is the tie-break of last
/// resort in the queue sort.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Conversations matching the candidate predicate, with at most
    /// `message_window` trailing messages each.
    async fn fetch_candidates(&self, filter: &CandidateFilter) -> Result<Vec<Conversation>>;

    /// Conversations matching a listing filter, newest first, at most
    /// `filter.limit` rows, with at most `message_window` trailing messages each.
    async fn fetch_listing(
        &self,
        filter: &ListingFilter,
        message_window: usize,
    ) -> Result<Vec<Conversation>>;
}
