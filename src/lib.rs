#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Which Cache Should I Use?
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          What are you caching?                              │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │                                                                             │
//! │  ┌──────────────────┐                                                       │
//! │  │ Equal values to  │──Yes──▶ Built from shared parts?                      │
//! │  │ share one copy?  │              │                                        │
//! │  └────────┬─────────┘         Yes  │  No                                    │
//! │           │                    │   │                                        │
//! │          No                    ▼   ▼                                        │
//! │           │          ┌──────────────┐ ┌─────────┐  ┌─────────────┐          │
//! │           │          │CompositeCache│ │  Cache  │  │ InternCache │          │
//! │           │          └──────────────┘ └─────────┘  └─────────────┘          │
//! │           ▼                 (leased handles)         (no handles)           │
//! │  ┌──────────────────┐                                                       │
//! │  │ Function results │──▶ Bounded? ──No──▶ UnboundedCache                    │
//! │  └──────────────────┘       │                                               │
//! │                            Yes ──▶ one at a time, by recency ──▶ LruCache   │
//! │                                └─▶ in bulk, by metrics ──────▶ RankedCache  │
//! │                                                                             │
//! │  Shared between threads? wrap with SynchronizedCache, ConcurrentCache       │
//! │  or ThreadLocalCache.                                                       │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Reference
//!
//! | Type | Description |
//! |------|-------------|
//! | [`UnboundedStorage`] | Reference-counted dedup table, discards at count zero |
//! | [`LruStorage`] | Reference-counted dedup table, keeps idle entries up to a capacity |
//! | [`Cache`] | Object cache handing out [`Handle`]s to canonical values |
//! | [`CompositeCache`] | Object cache that interns a value's parts through other caches |
//! | [`InternCache`] | Canonical instance lookup, weak or strong |
//! | [`UnboundedCache`] | Memoization without bound, strong or weak keys |
//! | [`LruCache`] | Memoization bounded by recency |
//! | [`RankedCache`] | Memoization bounded by metric ranking with a load factor |
//! | [`Memoizer`] | Façade turning closures into memoized callables |
//!
//! ## Code Examples
//!
//! ### Deduplicating Values
//!
//! ```rust
//! use memocache::{Cache, ObjectCache};
//! use std::sync::Arc;
//!
//! let cache: Cache<String> = Cache::new();
//! let mut a = cache.create("shared".to_string()).unwrap();
//! let mut b = cache.create("shared".to_string()).unwrap();
//! assert!(Arc::ptr_eq(a.value().unwrap(), b.value().unwrap()));
//!
//! a.release().unwrap();
//! b.release().unwrap();
//! assert!(cache.is_empty());
//! ```
//!
//! ### Memoizing a Function
//!
//! ```rust
//! use memocache::config::LruCacheConfig;
//! use memocache::memo::LruFactory;
//! use memocache::Memoizer;
//! use core::num::NonZeroUsize;
//!
//! let memoizer = Memoizer::new(LruFactory::new(LruCacheConfig::new(
//!     NonZeroUsize::new(128).unwrap(),
//! )));
//! let slow_len = memoizer.memoize(|s: &String| s.chars().count()).unwrap();
//! assert_eq!(slow_len.get("héllo".to_string()), Ok(5));
//! ```
//!
//! ### Interning
//!
//! ```rust
//! use memocache::InternCache;
//! use std::sync::Arc;
//!
//! let names = InternCache::weak(|s: &Arc<String>| Arc::new(s.as_ref().clone()));
//! let a = names.intern(Arc::new("alice".to_string())).unwrap();
//! let b = names.intern(Arc::new("alice".to_string())).unwrap();
//! assert!(Arc::ptr_eq(&a, &b));
//! ```
//!
//! ## Modules
//!
//! - [`storage`]: reference-counted dedup tables
//! - [`handle`]: leases on stored values
//! - [`object`]: object caches, plain and composite
//! - [`memo`]: memoization caches and their factories
//! - [`intern`]: weak and strong interning
//! - [`concurrent`]: thread-safe adapters (requires `concurrent` feature)
//! - [`memoizer`]: memoization façade
//! - [`config`]: configuration structures
//! - [`metrics`]: per-entry and per-cache metrics

/// Error types returned by every fallible operation.
pub mod error;

/// Time sources for entry metrics.
pub mod clock;

/// Cache configuration structures.
pub mod config;

/// Per-entry and per-cache metrics.
pub mod metrics;

/// Stored memoization outcome paired with its metrics.
pub mod entry;

/// Doubly linked list with sentinel nodes and stable node pointers.
///
/// **Note**: This module is internal infrastructure. It exposes unsafe raw
/// pointer operations whose invariants the owning caches maintain.
pub(crate) mod list;

/// Reference-counted storage of canonical values.
pub mod storage;

/// Leases on stored values.
pub mod handle;

/// Object caches: plain and composite.
pub mod object;

/// How memoization keys are held: strongly or weakly.
pub mod retention;

/// Memoization caches.
pub mod memo;

/// Canonical instance lookup.
pub mod intern;

/// Thread-safe memoization adapters.
///
/// Available when the `concurrent` feature is enabled (default).
#[cfg(feature = "concurrent")]
pub mod concurrent;

/// Memoization façade.
pub mod memoizer;

pub use error::{CacheError, CacheResult, MemoError};
pub use handle::{Handle, Release};
pub use intern::InternCache;
pub use memo::{
    LruCache, MemoizationCache, MemoizationCacheFactory, NopCache, RankedCache, Trimmable,
    UnboundedCache,
};
pub use memoizer::{Memoized, Memoizer, WeakMemoizer};
pub use object::{Cache, CompositeCache, Decompose, ObjectCache};
pub use storage::{LruStorage, Storage, StorageEntry, UnboundedStorage};

#[cfg(feature = "concurrent")]
pub use concurrent::{ConcurrentCache, SynchronizedCache, ThreadLocalCache};
