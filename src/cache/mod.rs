//! Scope-keyed TTL cache with request coalescing.
//!
//! Entries, their eviction timers, and in-flight tickets live in one table
//! behind one mutex, so replacing an entry and cancelling its predecessor's
//! timer is a single atomic step. The lock is never held across an `.await`.
//!
//! A cache miss spawns the computation as its own task. Every caller for
//! the same key, including the one that triggered the miss, waits on the
//! ticket's `watch` channel, so a caller that goes away (client disconnect)
//! never strands the others.

pub mod invalidation;

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, error, info_span, Instrument};

use crate::{AppError, Result};

/// `None` until the computation settles.
type Outcome<V> = Option<Result<V>>;

struct Entry<V> {
    value: V,
    expires_at: Instant,
    generation: u64,
    evictor: AbortHandle,
}

struct Ticket<V> {
    generation: u64,
    outcome: watch::Receiver<Outcome<V>>,
}

struct Table<V> {
    entries: HashMap<String, Entry<V>>,
    tickets: HashMap<String, Ticket<V>>,
    next_generation: u64,
}

impl<V> Table<V> {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn remove_entry(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                entry.evictor.abort();
                true
            }
            None => false,
        }
    }

    fn remove_key(&mut self, key: &str) -> bool {
        let had_entry = self.remove_entry(key);
        let had_ticket = self.tickets.remove(key).is_some();
        had_entry || had_ticket
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from a live entry.
    pub hits: u64,
    /// Lookups that started a computation.
    pub misses: u64,
    /// Lookups that joined a computation already in flight.
    pub coalesced: u64,
    /// Entries removed by their TTL timer.
    pub evictions: u64,
    /// Keys removed by explicit invalidation.
    pub invalidations: u64,
}

struct Shared<V> {
    table: Mutex<Table<V>>,
    counters: Counters,
}

impl<V> Shared<V> {
    fn lock(&self) -> MutexGuard<'_, Table<V>> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Injected, per-process cache instance. Cloning shares the same table.
pub struct CacheManager<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for CacheManager<V> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Default for CacheManager<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync + 'static> CacheManager<V> {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(Table {
                    entries: HashMap::new(),
                    tickets: HashMap::new(),
                    next_generation: 0,
                }),
                counters: Counters::default(),
            }),
        }
    }

    /// Return the live value for `key` without computing anything.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<V> {
        let table = self.shared.lock();
        table
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    /// Return the cached value for `key`, computing it at most once across
    /// concurrent callers when absent or expired.
    ///
    /// A successful result is cached for `ttl`; a failure is delivered to
    /// every waiting caller and never cached.
    ///
    /// # Errors
    ///
    /// Returns whatever error `compute` produced, or
    /// `AppError::StoreUnavailable` if the computation panicked.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        self.get_or_compute_with(key, move |_| ttl, compute).await
    }

    /// Like [`get_or_compute`](Self::get_or_compute), with the TTL derived
    /// from the computed value (larger results may live longer).
    ///
    /// # Errors
    ///
    /// Returns whatever error `compute` produced, or
    /// `AppError::StoreUnavailable` if the computation panicked.
    pub async fn get_or_compute_with<T, F, Fut>(
        &self,
        key: &str,
        ttl_for: T,
        compute: F,
    ) -> Result<V>
    where
        T: FnOnce(&V) -> Duration + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let mut outcome = {
            let mut table = self.shared.lock();

            if let Some(entry) = table.entries.get(key) {
                if entry.expires_at > Instant::now() {
                    let value = entry.value.clone();
                    self.shared.counters.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key, "cache hit");
                    return Ok(value);
                }
                // Expired but its timer has not run yet.
                table.remove_entry(key);
            }

            if let Some(ticket) = table.tickets.get(key) {
                self.shared.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(key, "joining in-flight computation");
                ticket.outcome.clone()
            } else {
                self.shared.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache miss");
                let generation = table.next_generation();
                let (tx, rx) = watch::channel(None);
                table.tickets.insert(
                    key.to_owned(),
                    Ticket {
                        generation,
                        outcome: rx.clone(),
                    },
                );
                self.spawn_computation(key.to_owned(), generation, ttl_for, compute, tx);
                rx
            }
        };

        let settled = outcome
            .wait_for(Option::is_some)
            .await
            .map_err(|_| AppError::StoreUnavailable("cache computation abandoned".into()))?;
        match &*settled {
            Some(result) => result.clone(),
            None => Err(AppError::StoreUnavailable(
                "cache computation abandoned".into(),
            )),
        }
    }

    /// Evict `key` and detach any computation in flight for it.
    ///
    /// Callers already waiting on a detached computation still receive its
    /// result, but that result is not cached. Returns whether anything was
    /// removed.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.shared.lock().remove_key(key);
        if removed {
            self.shared
                .counters
                .invalidations
                .fetch_add(1, Ordering::Relaxed);
            debug!(key, "cache key invalidated");
        }
        removed
    }

    /// Evict a set of keys in one atomic step. Returns how many were removed.
    pub fn invalidate_all<I, K>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let removed = {
            let mut table = self.shared.lock();
            keys.into_iter()
                .filter(|key| table.remove_key(AsRef::<str>::as_ref(key)))
                .count()
        };
        self.shared
            .counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        debug!(removed, "cache keys invalidated");
        removed
    }

    /// Evict every key starting with `prefix`. Returns how many were removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let removed = {
            let mut table = self.shared.lock();
            let keys: Vec<String> = table
                .entries
                .keys()
                .chain(table.tickets.keys())
                .filter(|key| key.starts_with(prefix))
                .cloned()
                .collect();
            keys.iter().filter(|key| table.remove_key(key)).count()
        };
        self.shared
            .counters
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        debug!(prefix, removed, "cache prefix invalidated");
        removed
    }

    /// Drop every entry, timer and ticket.
    pub fn clear(&self) {
        let mut table = self.shared.lock();
        for (_, entry) in table.entries.drain() {
            entry.evictor.abort();
        }
        table.tickets.clear();
        debug!("cache cleared");
    }

    /// Number of stored entries, including expired ones awaiting eviction.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().entries.len()
    }

    /// Whether no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of computations currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.shared.lock().tickets.len()
    }

    /// Snapshot of the hit/miss/coalesce/eviction counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let counters = &self.shared.counters;
        CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            invalidations: counters.invalidations.load(Ordering::Relaxed),
        }
    }

    fn spawn_computation<T, F, Fut>(
        &self,
        key: String,
        generation: u64,
        ttl_for: T,
        compute: F,
        tx: watch::Sender<Outcome<V>>,
    ) where
        T: FnOnce(&V) -> Duration + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let span = info_span!("cache_compute", key = %key, generation);

        tokio::spawn(
            async move {
                let result = match AssertUnwindSafe(async move { compute().await })
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(_) => {
                        error!("cache computation panicked");
                        Err(AppError::StoreUnavailable(
                            "cache computation panicked".into(),
                        ))
                    }
                };

                settle(&shared, &key, generation, ttl_for, &result);
                // Receivers may all be gone; nobody is left to tell.
                let _ = tx.send(Some(result));
            }
            .instrument(span),
        );
    }
}

/// Retire the ticket and, on success, store the entry with a fresh timer.
///
/// A ticket detached by invalidation is left alone: its result is stale.
fn settle<V, T>(shared: &Arc<Shared<V>>, key: &str, generation: u64, ttl_for: T, result: &Result<V>)
where
    V: Clone + Send + Sync + 'static,
    T: FnOnce(&V) -> Duration,
{
    let mut table = shared.lock();

    let owns_ticket = table
        .tickets
        .get(key)
        .is_some_and(|ticket| ticket.generation == generation);
    if !owns_ticket {
        debug!(key, generation, "computation detached by invalidation, not cached");
        return;
    }
    table.tickets.remove(key);

    match result {
        Ok(value) => {
            let ttl = ttl_for(value);
            let expires_at = Instant::now() + ttl;
            let evictor = spawn_evictor(Arc::downgrade(shared), key.to_owned(), generation, expires_at);
            let entry = Entry {
                value: value.clone(),
                expires_at,
                generation,
                evictor,
            };
            if let Some(previous) = table.entries.insert(key.to_owned(), entry) {
                previous.evictor.abort();
            }
            debug!(key, ttl_ms = ttl.as_millis(), "cache entry stored");
        }
        Err(err) => {
            debug!(key, %err, "computation failed, nothing cached");
        }
    }
}

fn spawn_evictor<V>(
    shared: Weak<Shared<V>>,
    key: String,
    generation: u64,
    expires_at: Instant,
) -> AbortHandle
where
    V: Send + Sync + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep_until(expires_at).await;
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let mut table = shared.lock();
        if table
            .entries
            .get(&key)
            .is_some_and(|entry| entry.generation == generation)
        {
            table.entries.remove(&key);
            shared.counters.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key, "cache entry expired");
        }
    })
    .abort_handle()
}
