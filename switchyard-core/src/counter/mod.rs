//! Atomic counter primitive shared by locks, timeout counters and the rate
//! limiter.
//!
//! Every mutation is a single round trip against the store. An increment sets
//! the key's expiry when the counter is created and repairs it when an
//! existing key turns up without one, so a lost expire call can never leave a
//! counter that lives forever.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use self::memory::InMemoryCounterStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisCounterStore;

/// Result of an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterTick {
    pub count: i64,
    /// The key existed without an expiry and had it restored.
    pub ttl_repaired: bool,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increments `key`, setting `ttl` on the first increment (or restoring it
    /// when missing).
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<CounterTick>;

    /// Current value; an absent or expired key reads as zero.
    async fn get_count(&self, key: &str) -> Result<i64>;

    async fn reset(&self, key: &str) -> Result<()>;

    /// Remaining lifetime, `None` when the key is absent or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Sets `key = owner` only if the key does not exist. The key expires
    /// after `ttl` whether or not it is released.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool>;

    /// Deletes `key` only while `owner` still holds it.
    async fn release(&self, key: &str, owner: &str) -> Result<bool>;
}

/// Millisecond TTL as sent to the store; never below one millisecond.
pub fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}
