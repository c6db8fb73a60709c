//! Configuration for metric-ranked, bulk-evicting memoization caches.
//!
//! A ranked cache holds at most `capacity` entries. When a new key arrives
//! while the cache is full, reclaimed weak slots are swept first and then the
//! worst-ranked entries are evicted in one pass until occupancy is at most
//! `floor(capacity * load_factor)` (and always below `capacity`, so the new
//! entry fits).
//!
//! ```text
//! capacity = 8, load_factor = 0.5
//!
//!  full:   [a][b][c][d][e][f][g][h]   + insert i
//!  ranked: evict 4 worst
//!  after:  [b][d][f][h][i]            occupancy 5
//! ```

use crate::error::{CacheError, CacheResult};
use core::fmt;
use core::num::NonZeroUsize;

/// Which end of the ranking gets evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionOrder {
    /// Entries with the smallest rank are evicted first.
    #[default]
    Lowest,
    /// Entries with the largest rank are evicted first.
    Highest,
}

/// Configuration for a ranked cache.
#[derive(Clone, Copy)]
pub struct RankedCacheConfig {
    /// Maximum number of entries (weak slots included until swept).
    pub capacity: NonZeroUsize,
    /// Fraction of `capacity` kept after a bulk eviction, in `(0, 1]`.
    pub load_factor: f64,
    /// Which end of the ranking is evicted.
    pub order: EvictionOrder,
}

impl RankedCacheConfig {
    /// Creates a configuration evicting the lowest ranked entries.
    #[must_use]
    pub fn new(capacity: NonZeroUsize, load_factor: f64) -> Self {
        Self {
            capacity,
            load_factor,
            order: EvictionOrder::Lowest,
        }
    }

    /// Sets the eviction order.
    #[must_use]
    pub fn with_order(mut self, order: EvictionOrder) -> Self {
        self.order = order;
        self
    }

    /// Rejects load factors outside `(0, 1]`.
    pub fn validate(&self) -> CacheResult<()> {
        if self.load_factor.is_nan() || self.load_factor <= 0.0 || self.load_factor > 1.0 {
            return Err(CacheError::InvalidArgument(format!(
                "load factor must be in (0, 1], got {}",
                self.load_factor
            )));
        }
        Ok(())
    }

    /// Occupancy a bulk eviction trims down to.
    #[allow(clippy::cast_possible_truncation)]
    pub fn target_occupancy(&self) -> usize {
        let cap = self.capacity.get();
        let target = (cap as f64 * self.load_factor).floor() as usize;
        target.min(cap - 1)
    }
}

impl fmt::Debug for RankedCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RankedCacheConfig")
            .field("capacity", &self.capacity)
            .field("load_factor", &self.load_factor)
            .field("order", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cap: usize, load_factor: f64) -> RankedCacheConfig {
        RankedCacheConfig::new(NonZeroUsize::new(cap).unwrap(), load_factor)
    }

    #[test]
    fn test_load_factor_validation() {
        assert!(config(4, 1.0).validate().is_ok());
        assert!(config(4, 0.25).validate().is_ok());
        assert!(matches!(
            config(4, 0.0).validate(),
            Err(CacheError::InvalidArgument(_))
        ));
        assert!(config(4, 1.5).validate().is_err());
        assert!(config(4, f64::NAN).validate().is_err());
    }

    #[test]
    fn test_target_occupancy() {
        // A full load factor still frees exactly one slot.
        assert_eq!(config(4, 1.0).target_occupancy(), 3);
        assert_eq!(config(8, 0.5).target_occupancy(), 4);
        assert_eq!(config(10, 0.75).target_occupancy(), 7);
        assert_eq!(config(1, 0.5).target_occupancy(), 0);
    }

    #[test]
    fn test_order_builder() {
        let config = config(4, 1.0).with_order(EvictionOrder::Highest);
        assert_eq!(config.order, EvictionOrder::Highest);
    }
}
