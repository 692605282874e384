//! Scheduler snapshot cache.
//!
//! A snapshot is a versioned manifest per bucket that carries its own copy of
//! every account body, so a reader sees one version in full and never a body
//! written by another rebuild. Publishing is write-then-activate: the manifest
//! is stored first, then the bucket's active pointer is swapped to the new
//! version, and only if it is newer than the current one.
//!
//! Single-account writes (`set_account`, `delete_account`) do not touch any
//! manifest. They store an [`AccountPatch`] stamped from the same write
//! sequence as manifests; a read applies a patch only when it is newer than
//! the version being read. Last-used timestamps are merged on read as well.
//!
//! The cache is an optimization. Every error returned from here is expected to
//! be absorbed by the caller with a fall back to the system of record.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use switchyard_model::{Account, AccountId, SchedulerBucket};

use crate::error::Result;

pub mod keys;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use self::keys::SchedulerKeys;
pub use self::memory::InMemorySchedulerCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisSchedulerCache;

/// How long a superseded manifest stays readable after a newer version is
/// activated, so readers that already loaded the old active pointer finish.
pub const SUPERSEDED_GRACE: Duration = Duration::from_secs(60);

/// Persisted snapshot version, account bodies included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub version: u64,
    /// Position in the cache-wide write sequence shared with patches.
    pub seq: u64,
    pub built_at_ms: i64,
    pub accounts: Vec<Account>,
}

/// Single-account write made outside a rebuild. `account: None` is a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountPatch {
    pub seq: u64,
    pub account: Option<Account>,
}

impl SnapshotManifest {
    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_millis(self.built_at_ms)
    }

    /// `true` when the manifest is older than `max_age` at `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>, max_age: Option<Duration>) -> bool {
        let Some(max_age) = max_age else {
            return false;
        };
        let age_ms = now.timestamp_millis().saturating_sub(self.built_at_ms);
        // Builders on other hosts may run slightly ahead of this clock.
        age_ms.max(0) as u128 > max_age.as_millis()
    }
}

#[async_trait]
pub trait SchedulerCache: Send + Sync {
    /// Active snapshot of `bucket`. `Ok(None)` is a miss: nothing active, a
    /// version only partly present, or one past the staleness limit.
    async fn get_snapshot(&self, bucket: &SchedulerBucket) -> Result<Option<Vec<Account>>>;

    /// Stores a new version and activates it once fully written.
    async fn set_snapshot(&self, bucket: &SchedulerBucket, accounts: &[Account]) -> Result<()>;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>>;

    async fn set_account(&self, account: &Account) -> Result<()>;

    async fn delete_account(&self, id: AccountId) -> Result<()>;

    /// Best-effort batch of last-used timestamps, merged onto accounts on read.
    async fn update_last_used(&self, updates: &HashMap<AccountId, DateTime<Utc>>) -> Result<()>;

    /// Non-blocking. The lock expires after `ttl` even if never released.
    async fn try_lock_bucket(
        &self,
        bucket: &SchedulerBucket,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool>;

    /// Releases the lock only while `owner` still holds it.
    async fn unlock_bucket(&self, bucket: &SchedulerBucket, owner: &str) -> Result<bool>;

    /// Buckets that have had a snapshot published.
    async fn list_buckets(&self) -> Result<Vec<SchedulerBucket>>;

    async fn get_outbox_watermark(&self) -> Result<Option<i64>>;

    async fn set_outbox_watermark(&self, id: i64) -> Result<()>;
}

/// Accounts of `manifest` with newer patches applied. Deleted accounts are
/// left out; order is the manifest's.
pub(crate) fn overlay_patches(
    manifest: &SnapshotManifest,
    patches: &HashMap<AccountId, AccountPatch>,
) -> Vec<Account> {
    manifest
        .accounts
        .iter()
        .filter_map(|account| match patches.get(&account.id) {
            Some(patch) if patch.seq > manifest.seq => patch.account.clone(),
            _ => Some(account.clone()),
        })
        .collect()
}

/// Applies a last-used timestamp when it is newer than what the account holds.
pub(crate) fn merge_last_used(account: &mut Account, seen: Option<DateTime<Utc>>) {
    if let Some(seen) = seen
        && account.last_used_at.is_none_or(|current| current < seen)
    {
        account.last_used_at = Some(seen);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_model::AccountStatus;

    fn account(id: AccountId, concurrency: i32) -> Account {
        Account {
            id,
            name: format!("acc-{id}"),
            platform: "anthropic".into(),
            concurrency,
            priority: 1,
            status: AccountStatus::Active,
            schedulable: true,
            groups: Vec::new(),
            has_error: false,
            rate_limit_reset_at: None,
            temp_unschedulable_until: None,
            temp_unschedulable_reason: None,
            last_used_at: None,
        }
    }

    #[test]
    fn manifest_staleness_honours_max_age() {
        let now = Utc::now();
        let manifest = SnapshotManifest {
            version: 3,
            seq: 7,
            built_at_ms: (now - chrono::Duration::seconds(90)).timestamp_millis(),
            accounts: Vec::new(),
        };

        assert!(!manifest.is_stale_at(now, None));
        assert!(!manifest.is_stale_at(now, Some(Duration::from_secs(120))));
        assert!(manifest.is_stale_at(now, Some(Duration::from_secs(60))));
    }

    #[test]
    fn only_patches_newer_than_the_version_apply() {
        let manifest = SnapshotManifest {
            version: 2,
            seq: 10,
            built_at_ms: 0,
            accounts: vec![account(1, 5), account(2, 5), account(3, 5)],
        };
        let patches = HashMap::from([
            (1, AccountPatch { seq: 9, account: Some(account(1, 99)) }),
            (2, AccountPatch { seq: 11, account: Some(account(2, 20)) }),
            (3, AccountPatch { seq: 12, account: None }),
        ]);

        let seen: Vec<_> = overlay_patches(&manifest, &patches)
            .into_iter()
            .map(|a| (a.id, a.concurrency))
            .collect();
        assert_eq!(seen, vec![(1, 5), (2, 20)]);
    }
}
