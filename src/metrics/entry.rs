//! Per-entry memoization metrics.
//!
//! Every memoized key carries counters that are updated on each access.
//! The derived values ([`average_access_time`](EntryMetrics::average_access_time),
//! [`speedup_factor`](EntryMetrics::speedup_factor)) are recomputed from the
//! counters on every read and never stored.

use crate::error::{CacheError, CacheResult};
use core::fmt;
use core::time::Duration;

/// Counters recorded for a single memoized key.
///
/// All timestamps are offsets from the owning cache's [`Clock`](crate::clock::Clock)
/// epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryMetrics {
    /// When the entry was created.
    pub created: Duration,
    /// Number of recorded accesses, the creating access included.
    pub hit_count: u64,
    /// Time spent inside the memoized function when the entry was computed.
    pub invoke_duration: Duration,
    /// Accumulated time of all accesses, cache overhead and invocation included.
    pub total_duration: Duration,
    /// When the entry was last accessed.
    pub last_access: Duration,
}

impl EntryMetrics {
    /// Creates metrics for an entry computed at `created` in `invoke_duration`.
    ///
    /// The hit count starts at zero; call [`record_access`](Self::record_access)
    /// for the access that created the entry.
    pub fn new(created: Duration, invoke_duration: Duration) -> Self {
        Self {
            created,
            hit_count: 0,
            invoke_duration,
            total_duration: Duration::ZERO,
            last_access: created,
        }
    }

    /// Records an access that took `duration` and completed at `at`.
    pub fn record_access(&mut self, duration: Duration, at: Duration) {
        self.hit_count += 1;
        self.total_duration = self.total_duration.saturating_add(duration);
        self.last_access = at;
    }

    /// Total duration divided by the hit count, at nanosecond resolution.
    ///
    /// Fails with [`CacheError::DivideByZero`] while the hit count is zero.
    /// Use [`average_access_secs`](Self::average_access_secs) for the
    /// unrounded quotient.
    pub fn average_access_time(&self) -> CacheResult<Duration> {
        if self.hit_count == 0 {
            return Err(CacheError::DivideByZero);
        }
        let nanos = self.total_duration.as_nanos() / u128::from(self.hit_count);
        Ok(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }

    /// Total duration divided by the hit count, in seconds.
    pub fn average_access_secs(&self) -> CacheResult<f64> {
        if self.hit_count == 0 {
            return Err(CacheError::DivideByZero);
        }
        Ok(self.total_duration.as_secs_f64() / self.hit_count as f64)
    }

    /// Invocation duration divided by the average access time.
    ///
    /// Computed as `invoke * hits / total` so sub-nanosecond averages keep
    /// their precision. Fails like
    /// [`average_access_time`](Self::average_access_time) and yields NaN
    /// while the total duration is zero.
    pub fn speedup_factor(&self) -> CacheResult<f64> {
        if self.hit_count == 0 {
            return Err(CacheError::DivideByZero);
        }
        if self.total_duration.is_zero() {
            return Ok(f64::NAN);
        }
        let invoke = self.invoke_duration.as_nanos() as f64;
        let total = self.total_duration.as_nanos() as f64;
        Ok(invoke * self.hit_count as f64 / total)
    }
}

impl fmt::Display for EntryMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits: {}, invoke: {:?}, total: {:?}, created: {:?}, last_access: {:?}",
            self.hit_count,
            self.invoke_duration,
            self.total_duration,
            self.created,
            self.last_access
        )
    }
}
