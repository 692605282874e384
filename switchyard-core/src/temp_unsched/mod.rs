//! Temporary scheduling bans.
//!
//! A ban is a [`TempUnschedState`] keyed by account. Expiry is lazy: readers
//! compare `until_unix` against the current time and treat a past ban exactly
//! like an absent one. Nothing sweeps stale entries. Do not add a sweeper; it
//! would race with writers re-banning the same account.

use std::collections::HashMap;

use async_trait::async_trait;
use switchyard_model::{AccountId, TempUnschedState};

use crate::error::Result;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;
pub mod rules;
pub mod service;
pub mod timeout;

pub use self::memory::InMemoryTempUnschedCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisTempUnschedCache;
pub use self::rules::TempUnschedRule;
pub use self::service::{TempUnschedPolicy, TempUnschedService};
pub use self::timeout::TimeoutCounter;

#[derive(Debug, Clone, Copy)]
pub struct TempUnschedKeys;

impl TempUnschedKeys {
    pub fn state(account_id: AccountId) -> String {
        format!("temp_unsched:account:{account_id}")
    }

    pub fn timeout_count(account_id: AccountId) -> String {
        format!("timeout_count:account:{account_id}")
    }
}

#[async_trait]
pub trait TempUnschedCache: Send + Sync {
    async fn set_temp_unsched(&self, account_id: AccountId, state: &TempUnschedState) -> Result<()>;

    /// Stored state, expired or not. Callers decide with
    /// [`TempUnschedState::is_active_at`].
    async fn get_temp_unsched(&self, account_id: AccountId) -> Result<Option<TempUnschedState>>;

    /// Stored states for `account_ids` in one round trip. Accounts without
    /// an entry are absent from the map.
    async fn get_temp_unsched_many(
        &self,
        account_ids: &[AccountId],
    ) -> Result<HashMap<AccountId, TempUnschedState>>;

    async fn delete_temp_unsched(&self, account_id: AccountId) -> Result<()>;
}
