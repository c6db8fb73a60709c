//! Cache Configuration Module
//!
//! Configuration structures for the memoization caches. Each bounded cache
//! family has its own struct with public fields; behaviour shared by every
//! cache lives in [`MemoOptions`].
//!
//! | Config | Used by | Description |
//! |--------|---------|-------------|
//! | `MemoOptions` | every memoization cache | error caching, metrics, clock |
//! | `LruCacheConfig` | [`LruCache`](crate::memo::LruCache) | capacity |
//! | `RankedCacheConfig` | [`RankedCache`](crate::memo::RankedCache) | capacity, load factor, eviction order |
//! | `ConcurrentCacheConfig` | `ConcurrentCache` | segment count |
//!
//! # Examples
//!
//! ```
//! use memocache::config::{EvictionOrder, RankedCacheConfig};
//! use core::num::NonZeroUsize;
//!
//! let config = RankedCacheConfig {
//!     capacity: NonZeroUsize::new(100).unwrap(),
//!     load_factor: 0.8,
//!     order: EvictionOrder::Lowest,
//! };
//! assert!(config.validate().is_ok());
//! assert_eq!(config.target_occupancy(), 80);
//! ```

pub mod lru;
pub mod memo;
pub mod ranked;

#[cfg(feature = "concurrent")]
pub mod concurrent;

pub use lru::LruCacheConfig;
pub use memo::MemoOptions;
pub use ranked::{EvictionOrder, RankedCacheConfig};

#[cfg(feature = "concurrent")]
pub use concurrent::ConcurrentCacheConfig;
