//! Unit tests for the TTL cache: coalescing, expiry, invalidation and
//! failure handling.
//!
//! Timing tests run on a paused tokio clock, so TTL boundaries are exact.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::oneshot;

use support_desk::cache::CacheManager;
use support_desk::{AppError, Result};

const TTL: Duration = Duration::from_secs(20);

/// Compute closure that counts its invocations and returns the new count.
fn counting(
    calls: &Arc<AtomicUsize>,
    delay: Duration,
) -> impl FnOnce() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<u32>> + Send>>
       + Send
       + 'static {
    let calls = Arc::clone(calls);
    move || {
        Box::pin(async move {
            tokio::time::sleep(delay).await;
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(u32::try_from(n).unwrap())
        })
    }
}

async fn wait_until_in_flight(cache: &CacheManager<u32>) {
    while cache.in_flight() == 0 {
        tokio::task::yield_now().await;
    }
}

// ── Coalescing ──────────────────────────────────────────────────────────────

/// Ten concurrent misses for one key run the computation once and all
/// receive the same value.
#[tokio::test(start_paused = true)]
async fn concurrent_misses_coalesce() {
    let cache = CacheManager::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let results = join_all(
        (0..10).map(|_| cache.get_or_compute("queue", TTL, counting(&calls, Duration::from_millis(50)))),
    )
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| r == &Ok(1)));
    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.coalesced, 9);
}

/// Different keys compute independently.
#[tokio::test(start_paused = true)]
async fn distinct_keys_do_not_coalesce() {
    let cache = CacheManager::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let (a, b) = tokio::join!(
        cache.get_or_compute("a", TTL, counting(&calls, Duration::from_millis(10))),
        cache.get_or_compute("b", TTL, counting(&calls, Duration::from_millis(10))),
    );

    assert!(a.is_ok() && b.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(cache.len(), 2);
}

/// A caller that gives up does not strand the computation for others.
#[tokio::test(start_paused = true)]
async fn dropped_caller_does_not_abort_computation() {
    let cache = CacheManager::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let impatient = tokio::time::timeout(
        Duration::from_millis(10),
        cache.get_or_compute("queue", TTL, counting(&calls, Duration::from_millis(100))),
    )
    .await;
    assert!(impatient.is_err(), "first caller should time out");

    let value = cache
        .get_or_compute("queue", TTL, counting(&calls, Duration::ZERO))
        .await;

    assert_eq!(value, Ok(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// ── Expiry ──────────────────────────────────────────────────────────────────

/// Just before the TTL the entry is served; just after it is recomputed.
#[tokio::test(start_paused = true)]
async fn entry_expires_at_ttl() {
    let cache = CacheManager::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let first = cache
        .get_or_compute("global", TTL, counting(&calls, Duration::ZERO))
        .await;
    assert_eq!(first, Ok(1));

    tokio::time::sleep(Duration::from_millis(19_900)).await;
    let hit = cache
        .get_or_compute("global", TTL, counting(&calls, Duration::ZERO))
        .await;
    assert_eq!(hit, Ok(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(cache.get("global"), None);
    let recomputed = cache
        .get_or_compute("global", TTL, counting(&calls, Duration::ZERO))
        .await;
    assert_eq!(recomputed, Ok(2));
}

/// The eviction timer removes the entry and counts the eviction.
#[tokio::test(start_paused = true)]
async fn timer_evicts_expired_entry() {
    let cache = CacheManager::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));
    cache
        .get_or_compute("global", TTL, counting(&calls, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(cache.len(), 1);

    tokio::time::sleep(TTL + Duration::from_millis(1)).await;

    assert!(cache.is_empty());
    assert_eq!(cache.stats().evictions, 1);
}

/// A replacement entry is not removed by its predecessor's timer.
#[tokio::test(start_paused = true)]
async fn replaced_entry_keeps_its_own_timer() {
    let cache = CacheManager::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));
    cache
        .get_or_compute("global", TTL, counting(&calls, Duration::ZERO))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(cache.invalidate("global"));
    cache
        .get_or_compute("global", TTL, counting(&calls, Duration::ZERO))
        .await
        .unwrap();

    // Past the first entry's deadline, before the second's.
    tokio::time::sleep(Duration::from_secs(16)).await;

    assert_eq!(cache.get("global"), Some(2));
    assert_eq!(cache.stats().evictions, 0);
}

/// The TTL can depend on the computed value.
#[tokio::test(start_paused = true)]
async fn ttl_derived_from_value() {
    let cache = CacheManager::<u32>::new();

    cache
        .get_or_compute_with(
            "listing",
            |rows: &u32| Duration::from_secs(u64::from(*rows)),
            || async { Ok(300) },
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(299)).await;
    assert_eq!(cache.get("listing"), Some(300));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(cache.get("listing"), None);
}

// ── Failures ────────────────────────────────────────────────────────────────

/// Every coalesced caller receives the failure and nothing is cached.
#[tokio::test(start_paused = true)]
async fn failure_is_shared_and_not_cached() {
    let cache = CacheManager::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));

    let failing = |calls: &Arc<AtomicUsize>| {
        let calls = Arc::clone(calls);
        move || async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<u32, _>(AppError::StoreUnavailable("db down".into()))
        }
    };

    let results = join_all((0..5).map(|_| cache.get_or_compute("queue", TTL, failing(&calls)))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results
        .iter()
        .all(|r| matches!(r, Err(AppError::StoreUnavailable(_)))));
    assert!(cache.is_empty());
    assert_eq!(cache.in_flight(), 0);

    let retry = cache
        .get_or_compute("queue", TTL, counting(&calls, Duration::ZERO))
        .await;
    assert_eq!(retry, Ok(2));
}

/// A panicking computation becomes a store failure for every waiter.
#[tokio::test]
async fn panicking_computation_is_reported() {
    let cache = CacheManager::<u32>::new();

    let result = cache
        .get_or_compute("queue", TTL, || async {
            let rows: Vec<u32> = Vec::new();
            Ok(rows[0])
        })
        .await;

    assert!(matches!(result, Err(AppError::StoreUnavailable(_))));
    assert_eq!(cache.in_flight(), 0);
    assert!(cache.is_empty());
}

// ── Invalidation ────────────────────────────────────────────────────────────

/// Invalidation removes the entry; the next read recomputes.
#[tokio::test]
async fn invalidate_forces_recompute() {
    let cache = CacheManager::<u32>::new();
    let calls = Arc::new(AtomicUsize::new(0));
    cache
        .get_or_compute("queue", TTL, counting(&calls, Duration::ZERO))
        .await
        .unwrap();

    assert!(cache.invalidate("queue"));
    assert!(!cache.invalidate("queue"));
    let value = cache
        .get_or_compute("queue", TTL, counting(&calls, Duration::ZERO))
        .await;

    assert_eq!(value, Ok(2));
    assert_eq!(cache.stats().invalidations, 1);
}

/// A computation started before an invalidation still answers its own
/// callers, but its result is not cached over the newer one.
#[tokio::test]
async fn invalidation_detaches_in_flight_computation() {
    let cache = CacheManager::<u32>::new();

    let (release_first, first_gate) = oneshot::channel::<()>();
    let first = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_or_compute("queue", TTL, move || async move {
                    let _ = first_gate.await;
                    Ok(1)
                })
                .await
        })
    };
    wait_until_in_flight(&cache).await;

    assert!(cache.invalidate("queue"));
    assert_eq!(cache.in_flight(), 0);

    let (release_second, second_gate) = oneshot::channel::<()>();
    let second = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .get_or_compute("queue", TTL, move || async move {
                    let _ = second_gate.await;
                    Ok(2)
                })
                .await
        })
    };
    wait_until_in_flight(&cache).await;

    release_second.send(()).unwrap();
    assert_eq!(second.await.unwrap(), Ok(2));
    release_first.send(()).unwrap();
    assert_eq!(first.await.unwrap(), Ok(1));

    assert_eq!(cache.get("queue"), Some(2));
}

/// Batch invalidation only counts keys that were present.
#[tokio::test]
async fn invalidate_all_counts_removed_keys() {
    let cache = CacheManager::<u32>::new();
    for key in ["a", "b", "c"] {
        cache.get_or_compute(key, TTL, || async { Ok(0) }).await.unwrap();
    }

    let removed = cache.invalidate_all(["a", "c", "missing"]);

    assert_eq!(removed, 2);
    assert_eq!(cache.get("b"), Some(0));
    assert_eq!(cache.len(), 1);
}

/// Prefix invalidation leaves unrelated keys alone.
#[tokio::test]
async fn invalidate_prefix_matches_only_prefix() {
    let cache = CacheManager::<u32>::new();
    for key in ["listing:v1:limit=50", "listing:v1:panic:limit=10", "queue:v1:global"] {
        cache.get_or_compute(key, TTL, || async { Ok(0) }).await.unwrap();
    }

    assert_eq!(cache.invalidate_prefix("listing:"), 2);
    assert_eq!(cache.get("queue:v1:global"), Some(0));
}

/// Clearing drops everything.
#[tokio::test]
async fn clear_empties_cache() {
    let cache = CacheManager::<u32>::new();
    cache.get_or_compute("a", TTL, || async { Ok(1) }).await.unwrap();
    cache.get_or_compute("b", TTL, || async { Ok(2) }).await.unwrap();

    cache.clear();

    assert!(cache.is_empty());
    assert_eq!(cache.get("a"), None);
}

/// Hits are counted separately from misses.
#[tokio::test]
async fn stats_track_hits() {
    let cache = CacheManager::<u32>::new();
    for _ in 0..3 {
        cache.get_or_compute("a", TTL, || async { Ok(1) }).await.unwrap();
    }

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.coalesced, 0);
}
