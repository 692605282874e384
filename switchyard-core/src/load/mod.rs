//! Live per-account load: in-flight slots and waiting counters.
//!
//! A slot is one entry per request with its own expiry, so a request that
//! dies without releasing frees its slot once the TTL passes. Load is never
//! persisted in snapshots; it is always read at decision time.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use switchyard_model::{AccountId, AccountLoadInfo, AccountWithConcurrency};

use crate::error::Result;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod service;

pub use self::memory::InMemoryLoadTracker;
#[cfg(feature = "redis")]
pub use self::redis::RedisLoadTracker;
pub use self::service::{Admission, ConcurrencyService, DEFAULT_LOAD_BATCH_CHUNK};

/// Default lifetime of an unreleased slot.
pub const DEFAULT_SLOT_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, Copy)]
pub struct LoadKeys;

impl LoadKeys {
    pub fn concurrency(account_id: AccountId) -> String {
        format!("concurrency:account:{account_id}")
    }

    pub fn waiting(account_id: AccountId) -> String {
        format!("wait:account:{account_id}")
    }
}

#[async_trait]
pub trait LoadTracker: Send + Sync {
    /// Claims a slot for `request_id` unless the account already has
    /// `max_concurrency` live slots. Re-acquiring an existing slot refreshes
    /// it. A non-positive `max_concurrency` means unlimited.
    async fn acquire_slot(
        &self,
        account_id: AccountId,
        max_concurrency: i32,
        request_id: &str,
        ttl: Duration,
    ) -> Result<bool>;

    async fn release_slot(&self, account_id: AccountId, request_id: &str) -> Result<()>;

    /// Increments the waiting counter and returns the new value. The counter
    /// expires `ttl` after its last increment.
    async fn incr_waiting(&self, account_id: AccountId, ttl: Duration) -> Result<i64>;

    /// Decrements the waiting counter, never below zero.
    async fn decr_waiting(&self, account_id: AccountId) -> Result<()>;

    /// Live load of each account, keyed by ID. Accounts without any recorded
    /// load report zeros.
    async fn get_accounts_load_batch(
        &self,
        accounts: &[AccountWithConcurrency],
    ) -> Result<HashMap<AccountId, AccountLoadInfo>>;
}
