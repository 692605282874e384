//! System-of-record ports consumed by the scheduler.
//!
//! Implementations live in [`crate::postgres`]; tests provide in-memory fakes.

use async_trait::async_trait;
use switchyard_model::{Account, AccountId, Group, GroupId, OutboxEvent, SchedulerBucket};

use crate::error::Result;

#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Accounts of the bucket's group on the bucket's platform that are
    /// active and flagged schedulable, with their group memberships. Runtime
    /// flags (rate limit, temp ban, error) are returned as stored and
    /// evaluated by the caller.
    async fn list_schedulable_accounts(&self, bucket: &SchedulerBucket) -> Result<Vec<Account>>;

    /// `None` when the account no longer exists.
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>>;

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>>;

    async fn list_groups(&self) -> Result<Vec<Group>>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// Events with `id > after_id` in ascending ID order. A non-positive
    /// `limit` falls back to 100.
    async fn list_after(&self, after_id: i64, limit: i64) -> Result<Vec<OutboxEvent>>;

    /// Highest event ID, `0` when the log is empty.
    async fn max_id(&self) -> Result<i64>;
}

pub const DEFAULT_OUTBOX_PAGE: i64 = 100;

/// Page size actually requested for a caller-supplied `limit`.
pub fn outbox_page_size(limit: i64) -> i64 {
    if limit <= 0 { DEFAULT_OUTBOX_PAGE } else { limit }
}
