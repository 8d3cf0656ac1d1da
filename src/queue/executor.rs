//! Query executor: candidate read, classification, filtering, ordering.
//!
//! Candidate filtering is pushed to the store and re-checked in-process, so
//! stores that can only approximate the predicate still yield exact results.

use std::cmp::Reverse;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::models::conversation::{Conversation, ConversationStatus, Sender};
use crate::models::listing::ListingFilter;
use crate::models::scope::Scope;
use crate::models::summary::{Category, ClassifiedSummary};
use crate::{AppError, Result};

use super::classifier::{classify, UNREAD_WINDOW};
use super::store::{CandidateFilter, ConversationStore};

/// Maximum number of summaries in a live queue result.
pub const QUEUE_CAP: usize = 25;

/// How far back a non-completed conversation still counts as recently active.
pub const RECENT_ACTIVITY_HOURS: i64 = 24;

/// Builds classified, ordered queue results from the conversation store.
#[derive(Clone)]
pub struct QueryExecutor {
    store: Arc<dyn ConversationStore>,
    query_timeout: Duration,
}

impl QueryExecutor {
    /// Create an executor bounding every store read by `query_timeout`.
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>, query_timeout: Duration) -> Self {
        Self {
            store,
            query_timeout,
        }
    }

    /// Compute the live queue for `scope` as of now.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StoreUnavailable` if the store read fails or
    /// exceeds the query timeout. No partial result is ever returned.
    pub async fn execute(&self, scope: &Scope) -> Result<Vec<ClassifiedSummary>> {
        self.execute_at(scope, Utc::now()).await
    }

    /// Compute the live queue for `scope` relative to the instant `now`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StoreUnavailable` if the store read fails or
    /// exceeds the query timeout.
    pub async fn execute_at(
        &self,
        scope: &Scope,
        now: DateTime<Utc>,
    ) -> Result<Vec<ClassifiedSummary>> {
        let filter = CandidateFilter {
            scope: scope.clone(),
            active_since: now - chrono::Duration::hours(RECENT_ACTIVITY_HOURS),
            message_window: UNREAD_WINDOW,
        };

        let candidates = self.bounded(self.store.fetch_candidates(&filter)).await?;
        let queue = shape_queue(scope, &candidates, filter.active_since);
        debug!(
            %scope,
            candidates = candidates.len(),
            returned = queue.len(),
            "live queue computed"
        );
        Ok(queue)
    }

    /// Compute a conversation listing: classified, newest first, truncated
    /// to `filter.limit`. Idle conversations are kept.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an out-of-range limit and
    /// `AppError::StoreUnavailable` if the store read fails or times out.
    pub async fn execute_listing(&self, filter: &ListingFilter) -> Result<Vec<ClassifiedSummary>> {
        filter.validate()?;
        let rows = self
            .bounded(self.store.fetch_listing(filter, UNREAD_WINDOW))
            .await?;

        let mut listing: Vec<ClassifiedSummary> = rows
            .iter()
            .filter(|c| matches_listing(c, filter))
            .map(classify)
            .collect();
        listing.sort_by_key(|s| Reverse(s.updated_at));
        listing.truncate(filter.limit as usize);
        Ok(listing)
    }

    async fn bounded<T>(&self, read: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.query_timeout, read).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                warn!(%err, "conversation store read failed");
                Err(err.into_store_failure())
            }
            Err(_) => {
                let timeout_ms = self.query_timeout.as_millis();
                warn!(timeout_ms, "conversation store read timed out");
                Err(AppError::StoreUnavailable(format!(
                    "query timed out after {timeout_ms} ms"
                )))
            }
        }
    }
}

/// Filter, order and cap classified candidates into a live queue.
///
/// Candidates must be in the store's stable order; equal sort keys keep it.
#[must_use]
pub fn shape_queue(
    scope: &Scope,
    candidates: &[Conversation],
    active_since: DateTime<Utc>,
) -> Vec<ClassifiedSummary> {
    let partner_view = matches!(scope, Scope::ByPartner(_));

    let mut queue: Vec<ClassifiedSummary> = candidates
        .iter()
        .filter(|c| is_candidate(c, active_since))
        .filter_map(|conversation| {
            let summary = classify(conversation);
            let visible = summary.category != Category::Idle || conversation.status.awaits_pickup();
            if !visible || (partner_view && is_handled_escalation(conversation, &summary)) {
                return None;
            }
            Some(summary)
        })
        .collect();

    // `sort_by` is stable.
    queue.sort_by(|a, b| {
        b.priority_score
            .cmp(&a.priority_score)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
    });
    queue.truncate(QUEUE_CAP);
    queue
}

/// In-process form of the store pre-filter.
#[must_use]
pub fn is_candidate(conversation: &Conversation, active_since: DateTime<Utc>) -> bool {
    ConversationStatus::OPEN.contains(&conversation.status)
        || conversation.is_in_panic_room
        || (conversation.updated_at >= active_since
            && conversation.status != ConversationStatus::Completed)
}

/// Panic escalation an agent already answered: hidden from partner views.
fn is_handled_escalation(conversation: &Conversation, summary: &ClassifiedSummary) -> bool {
    conversation.is_in_panic_room
        && summary.unread_count == 0
        && conversation
            .last_message()
            .is_none_or(|m| m.sender != Sender::Customer)
}

fn matches_listing(conversation: &Conversation, filter: &ListingFilter) -> bool {
    filter.status.is_none_or(|s| conversation.status == s)
        && filter
            .partner
            .as_ref()
            .is_none_or(|p| conversation.scope_ref.as_deref() == Some(p.as_str()))
        && (!filter.panic_only || conversation.is_in_panic_room)
}
