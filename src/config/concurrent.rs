//! Configuration for the lock-minimized concurrent memoization cache.
//!
//! The key space is partitioned across `segments` independently locked maps,
//! so lookups on keys in different segments never contend.

use crate::error::{CacheError, CacheResult};
use core::fmt;

/// Returns the default number of segments based on available parallelism.
fn default_segment_count() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(16)
        .clamp(4, 64)
}

/// Configuration for a concurrent cache with segmented storage.
#[derive(Clone, Copy)]
pub struct ConcurrentCacheConfig {
    /// Number of independently locked segments.
    pub segments: usize,
}

impl ConcurrentCacheConfig {
    /// Creates a configuration with an explicit segment count.
    #[must_use]
    pub fn with_segments(segments: usize) -> Self {
        Self { segments }
    }

    /// Rejects a zero segment count.
    pub fn validate(&self) -> CacheResult<()> {
        if self.segments == 0 {
            return Err(CacheError::InvalidArgument(
                "segments must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ConcurrentCacheConfig {
    fn default() -> Self {
        Self {
            segments: default_segment_count(),
        }
    }
}

impl fmt::Debug for ConcurrentCacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentCacheConfig")
            .field("segments", &self.segments)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrent_config_default() {
        let config = ConcurrentCacheConfig::default();
        assert!(config.segments >= 4 && config.segments <= 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_concurrent_config_rejects_zero_segments() {
        let config = ConcurrentCacheConfig::with_segments(0);
        assert!(matches!(
            config.validate(),
            Err(CacheError::InvalidArgument(_))
        ));
    }
}
