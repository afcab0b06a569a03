//! Shared counter store: the external key-value service holding rate-limit
//! counters and the subscription cache.
//!
//! All multi-key mutation goes through [`CounterStore::check_and_increment`],
//! which must be all-or-nothing: either every counter is incremented by one,
//! or none is and the first exceeding ceiling is reported. The Redis backend
//! runs the whole operation as a single server-side script; the in-memory
//! backend holds one lock for the duration.

pub mod memory;
pub mod redis;

pub use self::memory::MemoryCounterStore;
pub use self::redis::RedisCounterStore;

use async_trait::async_trait;

use crate::error::Error;

/// Result of the atomic multi-limit check-and-increment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalOutcome {
    /// Every counter was incremented. `counts` holds the post-increment value
    /// per key in input order; `max_ttl_seconds` is the largest TTL among the
    /// touched keys, used as the retry-after hint on the success path.
    Admitted {
        counts: Vec<u64>,
        max_ttl_seconds: i64,
    },
    /// The counter at `failed_index` had already reached its ceiling. No
    /// counter was touched.
    Denied {
        failed_index: usize,
        current: u64,
        ceiling: u64,
        retry_after_seconds: i64,
    },
}

/// Snapshot of one counter: current count and residual TTL in seconds
/// (negative when the key has no expiry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub count: u64,
    pub ttl_seconds: i64,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically check every ceiling and increment every counter, or neither.
    ///
    /// `keys`, `ceilings`, and `ttls` are parallel slices; a counter created
    /// by the increment (0 -> 1) gets the corresponding TTL, and TTLs of
    /// already-existing counters are left alone.
    async fn check_and_increment(
        &self,
        keys: &[String],
        ceilings: &[u64],
        ttls: &[i64],
    ) -> Result<EvalOutcome, Error>;

    /// Read a raw string value (subscription cache entries).
    async fn get_value(&self, key: &str) -> Result<Option<String>, Error>;

    /// Write a raw string value with a TTL (subscription cache entries).
    async fn set_value(&self, key: &str, value: &str, ttl_seconds: i64) -> Result<(), Error>;

    /// Delete one key. Returns the number of keys removed.
    async fn delete(&self, key: &str) -> Result<u64, Error>;

    /// Delete every key matching a glob pattern. Returns the number removed.
    async fn delete_matching(&self, pattern: &str) -> Result<u64, Error>;

    /// Observe a counter without touching it. Used by tests and diagnostics.
    async fn peek_counter(&self, key: &str) -> Result<Option<CounterSnapshot>, Error>;
}
