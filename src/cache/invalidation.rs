//! Write-path invalidation of live queue cache entries.
//!
//! Mutating operations call [`InvalidationHook::on_mutation`] after their
//! write commits. Eviction here only tightens freshness; dropping a call is
//! still correct within one TTL window.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::models::conversation::Conversation;
use crate::models::listing::LISTING_KEY_PREFIX;
use crate::models::scope::{PartnerId, Scope};
use crate::models::summary::ClassifiedSummary;

use super::CacheManager;

/// Cached value type shared by every queue and listing entry.
pub type QueueValue = Arc<Vec<ClassifiedSummary>>;

/// Evicts cache entries affected by a conversation mutation.
#[derive(Clone)]
pub struct InvalidationHook {
    cache: CacheManager<QueueValue>,
}

impl InvalidationHook {
    /// Bind the hook to the process cache instance.
    #[must_use]
    pub fn new(cache: CacheManager<QueueValue>) -> Self {
        Self { cache }
    }

    /// Evict the queue keys of every affected scope, plus all listings.
    ///
    /// Returns the number of cache keys removed.
    pub fn on_mutation(&self, affected_scopes: &HashSet<Scope>) -> usize {
        let queue_keys: Vec<String> = affected_scopes.iter().map(Scope::queue_key).collect();
        let queues = self.cache.invalidate_all(&queue_keys);
        let listings = self.cache.invalidate_prefix(LISTING_KEY_PREFIX);
        debug!(
            scopes = affected_scopes.len(),
            queues, listings, "mutation invalidated cache"
        );
        queues + listings
    }
}

/// Scopes whose queues can change when `conversation` is written:
/// always the global queue, plus its partner queue when it has one.
#[must_use]
pub fn affected_scopes(conversation: &Conversation) -> HashSet<Scope> {
    scopes_for(conversation.scope_ref.as_deref())
}

/// [`affected_scopes`] from the partner reference alone.
///
/// A `scope_ref` that is not a valid partner id cannot have a cached
/// partner queue, so it contributes nothing.
#[must_use]
pub fn scopes_for(scope_ref: Option<&str>) -> HashSet<Scope> {
    let mut scopes = HashSet::from([Scope::Global]);
    if let Some(partner) = scope_ref.and_then(|raw| PartnerId::parse(raw).ok()) {
        scopes.insert(Scope::ByPartner(partner));
    }
    scopes
}
