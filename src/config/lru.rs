//! Configuration for LRU-bounded memoization caches.
//!
//! # Examples
//!
//! ```
//! use memocache::config::{LruCacheConfig, MemoOptions};
//! use memocache::memo::{LruCache, MemoizationCache};
//! use core::num::NonZeroUsize;
//! use std::sync::Arc;
//!
//! let config = LruCacheConfig {
//!     capacity: NonZeroUsize::new(128).unwrap(),
//! };
//! let cache = LruCache::init(
//!     config,
//!     Arc::new(|x: &u32| Ok::<_, String>(x * 2)),
//!     MemoOptions::default(),
//! );
//! assert_eq!(cache.get_or_add(4), Ok(8));
//! ```

use core::fmt;
use core::num::NonZeroUsize;

/// Configuration for an LRU (Least Recently Used) cache.
///
/// Inserting a new key into a full cache evicts the single least recently
/// used entry.
#[derive(Clone, Copy)]
pub struct LruCacheConfig {
    /// Maximum number of entries the cache holds.
    pub capacity: NonZeroUsize,
}

impl LruCacheConfig {
    /// Creates a configuration with the given capacity.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { capacity }
    }
}

impl fmt::Debug for LruCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCacheConfig")
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lru_config_creation() {
        let config = LruCacheConfig::new(NonZeroUsize::new(1000).unwrap());
        assert_eq!(config.capacity.get(), 1000);
        assert_eq!(
            format!("{:?}", config),
            "LruCacheConfig { capacity: 1000 }"
        );
    }
}
