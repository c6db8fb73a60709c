//! Memoization Entry Type
//!
//! A [`MemoEntry`] is what a memoization cache stores per key: the outcome of
//! the memoized call (a value, or a failure when error caching is enabled)
//! together with the key's [`EntryMetrics`].
//!
//! Entries are owned exclusively by the cache segment that created them.
//! Lookups hand out clones of the outcome, never references into the entry.

use crate::metrics::EntryMetrics;
use core::fmt;

/// Stored outcome of a memoized call plus its metrics.
#[derive(Clone, PartialEq)]
pub struct MemoEntry<V, E> {
    /// The value or captured failure.
    pub outcome: Result<V, E>,
    /// Access counters for this key.
    pub metrics: EntryMetrics,
}

impl<V, E> MemoEntry<V, E> {
    /// Creates an entry for a freshly computed outcome.
    #[inline]
    pub fn new(outcome: Result<V, E>, metrics: EntryMetrics) -> Self {
        Self { outcome, metrics }
    }

    /// `true` if the stored outcome is a failure.
    #[inline]
    pub fn is_failure(&self) -> bool {
        self.outcome.is_err()
    }

    /// Writes `key -> outcome` and, when `with_metrics` is set, the metrics.
    pub(crate) fn write_line<K: fmt::Debug>(
        &self,
        out: &mut String,
        key: &K,
        with_metrics: bool,
    ) -> fmt::Result
    where
        V: fmt::Debug,
        E: fmt::Debug,
    {
        use core::fmt::Write;

        write!(out, "  {:?} -> {:?}", key, self.outcome)?;
        if with_metrics {
            write!(out, " [{}]", self.metrics)?;
        }
        writeln!(out)
    }
}

impl<V: fmt::Debug, E: fmt::Debug> fmt::Debug for MemoEntry<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoEntry")
            .field("outcome", &self.outcome)
            .field("metrics", &self.metrics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;

    #[test]
    fn test_entry_line_format() {
        let entry: MemoEntry<i32, String> =
            MemoEntry::new(Ok(42), EntryMetrics::new(Duration::ZERO, Duration::ZERO));
        let mut out = String::new();
        entry.write_line(&mut out, &"key", false).unwrap();
        assert_eq!(out, "  \"key\" -> Ok(42)\n");

        let mut out = String::new();
        entry.write_line(&mut out, &"key", true).unwrap();
        assert!(out.contains("hits: 0"));
    }

    #[test]
    fn test_failure_flag() {
        let entry: MemoEntry<i32, &str> =
            MemoEntry::new(Err("bad"), EntryMetrics::default());
        assert!(entry.is_failure());
    }
}
