//! Concurrent Adapter Correctness Tests
//!
//! These tests validate that the thread-safe adapters keep their contracts
//! while many threads hit them at once.
//!
//! ## Test Strategy
//!
//! - Count invocations to prove exactly-once computation per key
//! - Gate slow invocations with atomics so blocking behaviour is observable
//! - Compare global views fetched from different threads
//!
//! ## Segments
//!
//! 1. **ConcurrentCache**: per-key coordination
//! 2. **SynchronizedCache**: whole-call locking
//! 3. **ThreadLocalCache**: per-thread instances and the global view

#![cfg(feature = "concurrent")]

use core::num::NonZeroUsize;
use core::time::Duration;
use memocache::concurrent::{ConcurrentCache, SynchronizedCache, ThreadLocalCache};
use memocache::config::{ConcurrentCacheConfig, LruCacheConfig, MemoOptions};
use memocache::memo::{LruCache, MemoizationCache, UnboundedFactory};
use memocache::metrics::CacheMetrics;
use memocache::MemoError;
use scoped_threadpool::Pool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

fn wait_for(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }
}

// ============================================================================
// SEGMENT 1: CONCURRENT CACHE
// ============================================================================

#[test]
fn test_concurrent_exactly_once_per_key() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let cache: ConcurrentCache<u32, u64, ()> = ConcurrentCache::init(
        ConcurrentCacheConfig::with_segments(4),
        Arc::new(move |x: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(2));
            Ok(u64::from(*x) * 7)
        }),
        MemoOptions::default(),
    )
    .unwrap();

    let mut pool = Pool::new(8);
    pool.scoped(|scope| {
        for _ in 0..8 {
            let cache = &cache;
            scope.execute(move || {
                for k in 0..20u32 {
                    assert_eq!(cache.get_or_add(k), Ok(u64::from(k) * 7));
                }
            });
        }
    });

    assert_eq!(calls.load(Ordering::SeqCst), 20);
    assert_eq!(cache.len(), 20);
}

#[test]
fn test_concurrent_lru_stays_bounded_under_contention() {
    let cache: ConcurrentCache<u32, u32, ()> = ConcurrentCache::init_lru(
        ConcurrentCacheConfig::with_segments(4),
        LruCacheConfig::new(NonZeroUsize::new(16).unwrap()),
        Arc::new(|x: &u32| Ok(x * 3)),
        MemoOptions::default(),
    )
    .unwrap();

    let mut pool = Pool::new(8);
    pool.scoped(|scope| {
        for t in 0..8u32 {
            let cache = &cache;
            scope.execute(move || {
                for k in 0..500u32 {
                    let key = (k * 7 + t) % 64;
                    assert_eq!(cache.get_or_add(key), Ok(key * 3));
                }
            });
        }
    });

    // 4 shards of ceil(16 / 4) entries each.
    assert!(cache.len() <= 16);
    let metrics = cache.metrics();
    assert!(metrics.get("evictions").copied().unwrap_or(0.0) > 0.0);
    assert_eq!(metrics.get("capacity"), Some(&16.0));
}

#[test]
fn test_concurrent_slow_key_does_not_block_others() {
    let started = Arc::new(AtomicBool::new(false));
    let gate = Arc::new(AtomicBool::new(false));
    let cache: ConcurrentCache<u32, u32, ()> = {
        let started = Arc::clone(&started);
        let gate = Arc::clone(&gate);
        ConcurrentCache::init(
            ConcurrentCacheConfig::with_segments(1),
            Arc::new(move |x: &u32| {
                if *x == 0 {
                    started.store(true, Ordering::SeqCst);
                    wait_for(&gate);
                }
                Ok(x + 1)
            }),
            MemoOptions::default(),
        )
        .unwrap()
    };

    let mut pool = Pool::new(1);
    pool.scoped(|scope| {
        let slow = &cache;
        scope.execute(move || {
            assert_eq!(slow.get_or_add(0), Ok(1));
        });

        wait_for(&started);
        // Same segment, different key: answered while key 0 is in flight.
        assert_eq!(cache.get_or_add(5), Ok(6));
        assert_eq!(cache.len(), 1);
        gate.store(true, Ordering::SeqCst);
    });

    assert_eq!(cache.len(), 2);
}

#[test]
fn test_concurrent_waiters_share_one_invocation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let started = Arc::new(AtomicBool::new(false));
    let gate = Arc::new(AtomicBool::new(false));
    let cache: ConcurrentCache<u32, u32, ()> = {
        let calls = Arc::clone(&calls);
        let started = Arc::clone(&started);
        let gate = Arc::clone(&gate);
        ConcurrentCache::init(
            ConcurrentCacheConfig::with_segments(2),
            Arc::new(move |x: &u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                started.store(true, Ordering::SeqCst);
                wait_for(&gate);
                Ok(x * 2)
            }),
            MemoOptions::default(),
        )
        .unwrap()
    };

    let mut pool = Pool::new(4);
    pool.scoped(|scope| {
        for _ in 0..4 {
            let cache = &cache;
            scope.execute(move || {
                assert_eq!(cache.get_or_add(21), Ok(42));
            });
        }
        wait_for(&started);
        thread::sleep(Duration::from_millis(20));
        gate.store(true, Ordering::SeqCst);
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_uncached_failure_reaches_waiters() {
    let calls = Arc::new(AtomicUsize::new(0));
    let started = Arc::new(AtomicBool::new(false));
    let gate = Arc::new(AtomicBool::new(false));
    let cache: ConcurrentCache<u32, u32, String> = {
        let calls = Arc::clone(&calls);
        let started = Arc::clone(&started);
        let gate = Arc::clone(&gate);
        ConcurrentCache::init(
            ConcurrentCacheConfig::with_segments(2),
            Arc::new(move |_: &u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                started.store(true, Ordering::SeqCst);
                wait_for(&gate);
                Err("boom".to_string())
            }),
            MemoOptions::default(),
        )
        .unwrap()
    };

    let failures = Mutex::new(0);
    let mut pool = Pool::new(3);
    pool.scoped(|scope| {
        for _ in 0..3 {
            let cache = &cache;
            let failures = &failures;
            scope.execute(move || {
                if cache.get_or_add(1) == Err(MemoError::Invoke("boom".to_string())) {
                    *failures.lock().unwrap() += 1;
                }
            });
        }
        wait_for(&started);
        thread::sleep(Duration::from_millis(20));
        gate.store(true, Ordering::SeqCst);
    });

    assert_eq!(*failures.lock().unwrap(), 3);
    assert_eq!(cache.len(), 0);
    // The failure was not cached, so a new call invokes again.
    assert!(cache.get_or_add(1).is_err());
    assert!(calls.load(Ordering::SeqCst) >= 2);
}

// ============================================================================
// SEGMENT 2: SYNCHRONIZED CACHE
// ============================================================================

#[test]
fn test_synchronized_lru_exactly_once_per_key() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let cache = SynchronizedCache::new(LruCache::init(
        LruCacheConfig::new(NonZeroUsize::new(64).unwrap()),
        Arc::new(move |x: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(x.count_ones())
        }),
        MemoOptions::default(),
    ));

    let mut pool = Pool::new(6);
    pool.scoped(|scope| {
        for t in 0..6u32 {
            let cache = &cache;
            scope.execute(move || {
                for k in 0..32u32 {
                    let key = (k + t) % 32;
                    assert_eq!(cache.get_or_add(key), Ok(key.count_ones()));
                }
            });
        }
    });

    assert_eq!(calls.load(Ordering::SeqCst), 32);
    assert_eq!(cache.len(), 32);
}

#[test]
fn test_synchronized_capacity_holds_under_contention() {
    let cache = SynchronizedCache::new(LruCache::init(
        LruCacheConfig::new(NonZeroUsize::new(8).unwrap()),
        Arc::new(|x: &u32| Ok::<_, ()>(*x)),
        MemoOptions::default(),
    ));

    let mut pool = Pool::new(4);
    pool.scoped(|scope| {
        for t in 0..4u32 {
            let cache = &cache;
            scope.execute(move || {
                for k in 0..200u32 {
                    cache.get_or_add(k * 4 + t).unwrap();
                    assert!(cache.len() <= 8);
                }
            });
        }
    });

    assert_eq!(cache.len(), 8);
}

// ============================================================================
// SEGMENT 3: THREAD-LOCAL CACHE
// ============================================================================

#[test]
fn test_thread_local_invokes_once_per_thread() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let cache = ThreadLocalCache::new(
        UnboundedFactory,
        Arc::new(move |x: &u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(x + 1)
        }),
        MemoOptions::default().with_metrics(false),
    );

    let mut pool = Pool::new(4);
    pool.scoped(|scope| {
        for _ in 0..4 {
            let cache = &cache;
            scope.execute(move || {
                for _ in 0..3 {
                    for k in 0..5u32 {
                        assert_eq!(cache.get_or_add(k), Ok(k + 1));
                    }
                }
            });
        }
    });

    let threads = calls.load(Ordering::SeqCst) / 5;
    assert_eq!(calls.load(Ordering::SeqCst) % 5, 0);
    assert!((1..=4).contains(&threads));
    assert_eq!(cache.global_view().count, threads * 5);
}

#[test]
fn test_thread_local_global_view_matches_across_threads() {
    let cache = ThreadLocalCache::new(
        UnboundedFactory,
        Arc::new(|x: &u32| Ok::<_, ()>(x * x)),
        MemoOptions::default().with_metrics(false),
    );

    let mut pool = Pool::new(3);
    pool.scoped(|scope| {
        for t in 0..3u32 {
            let cache = &cache;
            scope.execute(move || {
                cache.get_or_add(t).unwrap();
                cache.get_or_add(10 + t).unwrap();
            });
        }
    });

    let here = cache.global_view();
    let views = Mutex::new(Vec::new());
    let mut pool = Pool::new(2);
    pool.scoped(|scope| {
        for _ in 0..2 {
            let cache = &cache;
            let views = &views;
            scope.execute(move || {
                views.lock().unwrap().push(cache.global_view());
            });
        }
    });

    for view in views.into_inner().unwrap() {
        assert_eq!(view, here);
    }
    assert_eq!(here.count, 6);
    assert!(here.debug_view.contains("  12 -> Ok(144)\n"));
}
