use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use switchyard_model::{Account, AccountId, SchedulerBucket};
use tokio::time::Instant;
use tracing::debug;

use super::{
    AccountPatch, SchedulerCache, SchedulerKeys, SnapshotManifest, merge_last_used,
    overlay_patches,
};
use crate::counter::{CounterStore, InMemoryCounterStore};
use crate::error::Result;
use crate::memory::Availability;

#[derive(Debug)]
struct Published {
    manifest: SnapshotManifest,
    built: Instant,
}

#[derive(Debug, Default)]
struct State {
    versions: HashMap<SchedulerBucket, u64>,
    seq: u64,
    active: HashMap<SchedulerBucket, Arc<Published>>,
    accounts: HashMap<AccountId, Account>,
    patches: HashMap<AccountId, AccountPatch>,
    last_used: HashMap<AccountId, DateTime<Utc>>,
    watermark: Option<i64>,
}

impl State {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn patch(&mut self, id: AccountId, account: Option<Account>) {
        let seq = self.next_seq();
        self.patches.insert(id, AccountPatch { seq, account });
    }

    /// Drops patches no active version can still be older than.
    fn prune_patches(&mut self) {
        if let Some(floor) = self.active.values().map(|p| p.manifest.seq).min() {
            self.patches.retain(|_, patch| patch.seq > floor);
        }
    }
}

/// Process-local [`SchedulerCache`].
#[derive(Clone, Default)]
pub struct InMemorySchedulerCache {
    state: Arc<Mutex<State>>,
    locks: InMemoryCounterStore,
    availability: Availability,
    snapshot_max_age: Option<Duration>,
}

impl fmt::Debug for InMemorySchedulerCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InMemorySchedulerCache")
            .field("buckets", &state.active.len())
            .field("accounts", &state.accounts.len())
            .field("patches", &state.patches.len())
            .field("watermark", &state.watermark)
            .field("available", &self.availability.is_available())
            .finish()
    }
}

impl InMemorySchedulerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_availability(availability: Availability) -> Self {
        Self {
            locks: InMemoryCounterStore::with_availability(availability.clone()),
            availability,
            ..Self::default()
        }
    }

    pub fn with_snapshot_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.snapshot_max_age = max_age;
        self
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }

    /// Active version of `bucket`, if any.
    pub fn active_version(&self, bucket: &SchedulerBucket) -> Option<u64> {
        self.state
            .lock()
            .active
            .get(bucket)
            .map(|p| p.manifest.version)
    }
}

#[async_trait]
impl SchedulerCache for InMemorySchedulerCache {
    async fn get_snapshot(&self, bucket: &SchedulerBucket) -> Result<Option<Vec<Account>>> {
        self.availability.check("get_snapshot")?;
        let state = self.state.lock();
        let Some(published) = state.active.get(bucket) else {
            debug!(%bucket, "snapshot miss: nothing active");
            return Ok(None);
        };
        if let Some(max_age) = self.snapshot_max_age
            && published.built.elapsed() > max_age
        {
            debug!(%bucket, version = published.manifest.version, "snapshot miss: stale");
            return Ok(None);
        }

        let mut accounts = overlay_patches(&published.manifest, &state.patches);
        for account in &mut accounts {
            merge_last_used(account, state.last_used.get(&account.id).copied());
        }
        Ok(Some(accounts))
    }

    async fn set_snapshot(&self, bucket: &SchedulerBucket, accounts: &[Account]) -> Result<()> {
        self.availability.check("set_snapshot")?;
        let mut state = self.state.lock();
        let version = state.versions.entry(bucket.clone()).or_default();
        *version += 1;
        let version = *version;
        let seq = state.next_seq();
        for account in accounts {
            state.accounts.insert(account.id, account.clone());
        }
        let published = Arc::new(Published {
            manifest: SnapshotManifest {
                version,
                seq,
                built_at_ms: Utc::now().timestamp_millis(),
                accounts: accounts.to_vec(),
            },
            built: Instant::now(),
        });
        debug!(%bucket, version, "snapshot activated");
        state.active.insert(bucket.clone(), published);
        state.prune_patches();
        Ok(())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.availability.check("get_account")?;
        let state = self.state.lock();
        Ok(state.accounts.get(&id).cloned().map(|mut account| {
            merge_last_used(&mut account, state.last_used.get(&id).copied());
            account
        }))
    }

    async fn set_account(&self, account: &Account) -> Result<()> {
        self.availability.check("set_account")?;
        let mut state = self.state.lock();
        state.accounts.insert(account.id, account.clone());
        state.patch(account.id, Some(account.clone()));
        Ok(())
    }

    async fn delete_account(&self, id: AccountId) -> Result<()> {
        self.availability.check("delete_account")?;
        let mut state = self.state.lock();
        state.accounts.remove(&id);
        state.last_used.remove(&id);
        state.patch(id, None);
        Ok(())
    }

    async fn update_last_used(&self, updates: &HashMap<AccountId, DateTime<Utc>>) -> Result<()> {
        self.availability.check("update_last_used")?;
        let mut state = self.state.lock();
        for (id, at) in updates {
            let entry = state.last_used.entry(*id).or_insert(*at);
            if *entry < *at {
                *entry = *at;
            }
        }
        Ok(())
    }

    async fn try_lock_bucket(
        &self,
        bucket: &SchedulerBucket,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool> {
        self.locks
            .try_acquire(&SchedulerKeys::lock(bucket), owner, ttl)
            .await
    }

    async fn unlock_bucket(&self, bucket: &SchedulerBucket, owner: &str) -> Result<bool> {
        self.locks.release(&SchedulerKeys::lock(bucket), owner).await
    }

    async fn list_buckets(&self) -> Result<Vec<SchedulerBucket>> {
        self.availability.check("list_buckets")?;
        let mut buckets: Vec<_> = self.state.lock().active.keys().cloned().collect();
        buckets.sort();
        Ok(buckets)
    }

    async fn get_outbox_watermark(&self) -> Result<Option<i64>> {
        self.availability.check("get_outbox_watermark")?;
        Ok(self.state.lock().watermark)
    }

    async fn set_outbox_watermark(&self, id: i64) -> Result<()> {
        self.availability.check("set_outbox_watermark")?;
        self.state.lock().watermark = Some(id);
        Ok(())
    }
}
