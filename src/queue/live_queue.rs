//! Cached front door of the queue engine.
//!
//! Picks the TTL for each result shape and routes every read through the
//! cache manager so concurrent misses coalesce into one store query.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::invalidation::{InvalidationHook, QueueValue};
use crate::cache::CacheManager;
use crate::models::listing::ListingFilter;
use crate::models::scope::Scope;
use crate::Result;

use super::executor::QueryExecutor;

const LISTING_STEP: Duration = Duration::from_secs(60);
const LISTING_ROWS_PER_STEP: usize = 25;

/// TTL policy per result shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtls {
    /// Global live queue.
    pub global_queue: Duration,
    /// Partner-scoped live queue.
    pub partner_queue: Duration,
    /// Floor for listings.
    pub listing_min: Duration,
    /// Ceiling for listings.
    pub listing_max: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            global_queue: Duration::from_secs(20),
            partner_queue: Duration::from_secs(30),
            listing_min: Duration::from_secs(180),
            listing_max: Duration::from_secs(600),
        }
    }
}

impl CacheTtls {
    /// TTL of the live queue for `scope`.
    #[must_use]
    pub fn for_scope(&self, scope: &Scope) -> Duration {
        match scope {
            Scope::Global => self.global_queue,
            Scope::ByPartner(_) => self.partner_queue,
        }
    }

    /// TTL of a listing: one step per filter criterion and per 25 rows
    /// above the floor, clamped to the ceiling.
    #[must_use]
    pub fn for_listing(&self, complexity: u32, rows: usize) -> Duration {
        let row_steps = u32::try_from(rows / LISTING_ROWS_PER_STEP).unwrap_or(u32::MAX);
        let steps = complexity.saturating_add(row_steps);
        self.listing_min
            .saturating_add(LISTING_STEP.saturating_mul(steps))
            .min(self.listing_max)
    }
}

/// Cached queue and listing reads.
#[derive(Clone)]
pub struct LiveQueue {
    executor: QueryExecutor,
    cache: CacheManager<QueueValue>,
    ttls: CacheTtls,
}

impl LiveQueue {
    /// Assemble the live queue around an executor and an injected cache.
    #[must_use]
    pub fn new(executor: QueryExecutor, cache: CacheManager<QueueValue>, ttls: CacheTtls) -> Self {
        Self {
            executor,
            cache,
            ttls,
        }
    }

    /// Live queue for `scope`, from cache when fresh.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StoreUnavailable` if the recomputation fails; the
    /// failure is not cached.
    pub async fn get(&self, scope: &Scope) -> Result<QueueValue> {
        let executor = self.executor.clone();
        let owned_scope = scope.clone();
        self.cache
            .get_or_compute(&scope.queue_key(), self.ttls.for_scope(scope), move || async move {
                executor.execute(&owned_scope).await.map(Arc::new)
            })
            .await
    }

    /// Live queue for a raw partner id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidScope` for a malformed id before touching
    /// the cache or the store, otherwise as [`get`](Self::get).
    pub async fn get_partner(&self, raw_partner_id: &str) -> Result<QueueValue> {
        let scope = Scope::partner(raw_partner_id)?;
        self.get(&scope).await
    }

    /// Conversation listing, cached for 3 to 10 minutes depending on
    /// filter complexity and result size.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an out-of-range limit before
    /// touching the cache, otherwise as [`get`](Self::get).
    pub async fn list(&self, filter: ListingFilter) -> Result<QueueValue> {
        filter.validate()?;
        let key = filter.cache_key();
        let ttls = self.ttls;
        let complexity = filter.complexity();
        let executor = self.executor.clone();
        self.cache
            .get_or_compute_with(
                &key,
                move |rows: &QueueValue| ttls.for_listing(complexity, rows.len()),
                move || async move { executor.execute_listing(&filter).await.map(Arc::new) },
            )
            .await
    }

    /// Invalidation hook bound to this queue's cache.
    #[must_use]
    pub fn hook(&self) -> InvalidationHook {
        InvalidationHook::new(self.cache.clone())
    }

    /// The underlying cache instance.
    #[must_use]
    pub fn cache(&self) -> &CacheManager<QueueValue> {
        &self.cache
    }
}
