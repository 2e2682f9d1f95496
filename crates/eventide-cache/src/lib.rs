//! Eventide cache contract and in-memory implementation
//!
//! The `Cache` trait is the seam a Redis-backed implementation would fill in
//! a multi-process deployment; the in-memory `MemoryCache` covers the
//! embedded case. Rate limiting is built on the cache's atomic counter so it
//! works identically against either backend.

pub mod memory;
pub mod rate_limit;

pub use memory::MemoryCache;
pub use rate_limit::RateLimiter;

use async_trait::async_trait;
use eventide_core::Result;
use std::time::Duration;

/// Key namespace shared by all analytics cache entries.
pub const KEY_PREFIX: &str = "analytics";

/// Binary key/value cache with TTLs and atomic counters.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a value; None on miss or expiry.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a value, optionally with a TTL.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Remove a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key matching a glob pattern (`*` and `?`).
    /// Returns the number of keys removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<usize>;

    /// Atomically add to a counter key, creating it at zero first.
    ///
    /// The TTL is applied only when the key carries no TTL yet; it is never
    /// re-armed on later hits. Returns the new value.
    async fn increment_by(&self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64>;

    /// Whether a key exists and has not expired.
    async fn exists(&self, key: &str) -> Result<bool>;
}
