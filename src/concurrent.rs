//! Concurrency Adapters
//!
//! The caches in [`memo`](crate::memo) are `Send` but not `Sync`. The adapters
//! in this module share memoization across threads in three ways.
//!
//! | Adapter | Sharing | Blocking |
//! |---------|---------|----------|
//! | [`SynchronizedCache`] | one cache behind one re-entrant lock | every call waits for the lock, invocation included |
//! | [`ConcurrentCache`] | sharded unbounded, LRU or ranked segments, per-key coordination | only callers of the same in-flight key wait |
//! | [`ThreadLocalCache`] | one independent cache per thread | never |
//!
//! # Exactly Once Per Key
//!
//! [`SynchronizedCache`] and [`ConcurrentCache`] both invoke the memoized
//! function at most once per key while the outcome stays cached.
//! [`ThreadLocalCache`] invokes it once per key per thread.
//!
//! ```text
//!          ConcurrentCache
//!
//!   hash(key) % N  ──▶  Segment Selection
//!
//!   ┌──────────────┐ ┌──────────────┐     ┌──────────────┐
//!   │   Shard 0    │ │   Shard 1    │ ... │  Shard N-1   │
//!   │    Mutex     │ │    Mutex     │     │    Mutex     │
//!   │   segment    │ │   segment    │     │   segment    │
//!   │  key ─▶ cell │ │  key ─▶ cell │     │  key ─▶ cell │
//!   └──────────────┘ └──────────────┘     └──────────────┘
//!
//!   cell: Pending(owner) ──▶ Settled(outcome)   (stored in the segment
//!                       └──▶ Abandoned           unless an uncached failure)
//! ```
//!
//! The segment lock is held only to find or create a key's cell. The function
//! runs with no lock held; callers of the same key wait on the cell.

mod sharded;
mod synchronized;
mod thread_local;

pub use self::sharded::{ConcurrentCache, ConcurrentFactory, ConcurrentRankedFactory};
pub use self::synchronized::{SynchronizedCache, SynchronizedFactory};
pub use self::thread_local::{GlobalView, ThreadLocalCache, ThreadLocalFactory};
