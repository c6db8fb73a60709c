//! Options shared by every memoization cache.

use crate::clock::{Clock, SystemClock};
use core::fmt;
use std::sync::Arc;

/// Behavioural switches common to all memoization caches.
///
/// # Examples
///
/// ```
/// use memocache::clock::VirtualClock;
/// use memocache::config::MemoOptions;
/// use std::sync::Arc;
///
/// let options = MemoOptions::default()
///     .with_cache_errors(true)
///     .with_clock(Arc::new(VirtualClock::new()));
/// assert!(options.cache_errors);
/// assert!(options.enable_metrics);
/// ```
#[derive(Clone)]
pub struct MemoOptions {
    /// Store failing outcomes and replay them instead of re-invoking.
    pub cache_errors: bool,
    /// Track per-entry metrics and expose trimming on unbounded caches.
    pub enable_metrics: bool,
    /// Time source for entry metrics.
    pub clock: Arc<dyn Clock>,
}

impl MemoOptions {
    /// Enables or disables error caching.
    #[must_use]
    pub fn with_cache_errors(mut self, cache_errors: bool) -> Self {
        self.cache_errors = cache_errors;
        self
    }

    /// Enables or disables metrics.
    #[must_use]
    pub fn with_metrics(mut self, enable_metrics: bool) -> Self {
        self.enable_metrics = enable_metrics;
        self
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for MemoOptions {
    fn default() -> Self {
        Self {
            cache_errors: false,
            enable_metrics: true,
            clock: Arc::new(SystemClock::new()),
        }
    }
}

impl fmt::Debug for MemoOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoOptions")
            .field("cache_errors", &self.cache_errors)
            .field("enable_metrics", &self.enable_metrics)
            .field("clock", &self.clock)
            .finish()
    }
}
