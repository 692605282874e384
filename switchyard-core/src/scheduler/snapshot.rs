use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use switchyard_model::{
    Account, AccountId, AccountLoadInfo, AccountWithConcurrency, SchedulerBucket,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::SchedulerCache;
use crate::error::Result;
use crate::load::ConcurrencyService;
use crate::ports::AccountRepository;
use crate::temp_unsched::TempUnschedService;

pub const DEFAULT_REBUILD_LOCK_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildOutcome {
    /// A new snapshot with this many accounts was published.
    Rebuilt(usize),
    /// Another rebuilder holds the bucket lock.
    Skipped,
}

/// An eligible account with its live load.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub account: Account,
    pub load: AccountLoadInfo,
    /// `false` once in-flight requests reach the account's capacity.
    pub has_capacity: bool,
}

/// Read and rebuild paths of the snapshot cache.
#[derive(Clone)]
pub struct SchedulerSnapshotService {
    cache: Arc<dyn SchedulerCache>,
    accounts: Arc<dyn AccountRepository>,
    temp_unsched: Option<TempUnschedService>,
    concurrency: Option<ConcurrencyService>,
    lock_ttl: Duration,
}

impl std::fmt::Debug for SchedulerSnapshotService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerSnapshotService")
            .field("temp_unsched", &self.temp_unsched.is_some())
            .field("concurrency", &self.concurrency.is_some())
            .field("lock_ttl", &self.lock_ttl)
            .finish_non_exhaustive()
    }
}

/// Order used for every published snapshot: group priority, then ID.
fn sort_for_bucket(accounts: &mut [Account], bucket: &SchedulerBucket) {
    accounts.sort_by_key(|a| (a.priority_in(bucket.group_id), a.id));
}

impl SchedulerSnapshotService {
    pub fn new(cache: Arc<dyn SchedulerCache>, accounts: Arc<dyn AccountRepository>) -> Self {
        Self {
            cache,
            accounts,
            temp_unsched: None,
            concurrency: None,
            lock_ttl: DEFAULT_REBUILD_LOCK_TTL,
        }
    }

    pub fn with_temp_unsched(mut self, service: TempUnschedService) -> Self {
        self.temp_unsched = Some(service);
        self
    }

    pub fn with_concurrency(mut self, service: ConcurrencyService) -> Self {
        self.concurrency = Some(service);
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn cache(&self) -> &Arc<dyn SchedulerCache> {
        &self.cache
    }

    pub fn repository(&self) -> &Arc<dyn AccountRepository> {
        &self.accounts
    }

    /// Accounts the router may pick from in `bucket` at `now`.
    ///
    /// Served from the active snapshot when there is one; a miss or any cache
    /// failure falls back to the system of record. Only a failure of the
    /// system of record itself is returned as an error.
    pub async fn list_schedulable_accounts(
        &self,
        bucket: &SchedulerBucket,
        now: DateTime<Utc>,
    ) -> Result<Vec<Account>> {
        let accounts = match self.cache.get_snapshot(bucket).await {
            Ok(Some(accounts)) => {
                debug!(%bucket, accounts = accounts.len(), "serving cached snapshot");
                accounts
            }
            Ok(None) => {
                debug!(%bucket, "snapshot miss, reading system of record");
                self.read_from_source(bucket).await?
            }
            Err(e) => {
                warn!(%bucket, error = %e, "snapshot cache unavailable, reading system of record");
                self.read_from_source(bucket).await?
            }
        };

        let mut eligible: Vec<Account> = accounts
            .into_iter()
            .filter(|a| a.in_group(bucket.group_id) && a.is_schedulable_at(now))
            .collect();

        if let Some(temp_unsched) = &self.temp_unsched {
            let ids: Vec<AccountId> = eligible.iter().map(|a| a.id).collect();
            let banned = temp_unsched.active_bans(&ids, now).await;
            if !banned.is_empty() {
                debug!(%bucket, banned = banned.len(), "excluding temp-unschedulable accounts");
                eligible.retain(|a| !banned.contains_key(&a.id));
            }
        }
        Ok(eligible)
    }

    async fn read_from_source(&self, bucket: &SchedulerBucket) -> Result<Vec<Account>> {
        let mut accounts = self.accounts.list_schedulable_accounts(bucket).await?;
        sort_for_bucket(&mut accounts, bucket);
        Ok(accounts)
    }

    /// Eligible accounts merged with live load. Load lookups are best-effort
    /// and report zero on failure.
    pub async fn select_candidates(
        &self,
        bucket: &SchedulerBucket,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candidate>> {
        let accounts = self.list_schedulable_accounts(bucket, now).await?;
        let loads = match &self.concurrency {
            Some(concurrency) => {
                let batch: Vec<AccountWithConcurrency> = accounts
                    .iter()
                    .map(|a| AccountWithConcurrency {
                        id: a.id,
                        max_concurrency: a.concurrency,
                    })
                    .collect();
                concurrency.get_accounts_load(&batch).await
            }
            None => HashMap::new(),
        };

        Ok(accounts
            .into_iter()
            .map(|account| {
                let load = loads.get(&account.id).copied().unwrap_or(AccountLoadInfo {
                    account_id: account.id,
                    ..AccountLoadInfo::default()
                });
                let has_capacity = account.concurrency <= 0
                    || load.current_concurrency < i64::from(account.concurrency);
                Candidate {
                    account,
                    load,
                    has_capacity,
                }
            })
            .collect())
    }

    /// Rebuilds `bucket` from the system of record under the bucket lock.
    ///
    /// The snapshot is a function of current state only, so repeating a
    /// rebuild without intervening changes publishes identical contents.
    pub async fn rebuild_bucket(&self, bucket: &SchedulerBucket) -> Result<RebuildOutcome> {
        let owner = Uuid::new_v4().to_string();
        if !self.cache.try_lock_bucket(bucket, &owner, self.lock_ttl).await? {
            debug!(%bucket, "rebuild skipped, bucket locked");
            return Ok(RebuildOutcome::Skipped);
        }

        let result = self.publish(bucket).await;

        match self.cache.unlock_bucket(bucket, &owner).await {
            Ok(true) => {}
            Ok(false) => warn!(%bucket, "bucket lock expired before rebuild finished"),
            Err(e) => warn!(%bucket, error = %e, "bucket lock release failed; it will expire"),
        }
        result.map(RebuildOutcome::Rebuilt)
    }

    async fn publish(&self, bucket: &SchedulerBucket) -> Result<usize> {
        let mut accounts = self.accounts.list_schedulable_accounts(bucket).await?;

        if let Some(temp_unsched) = &self.temp_unsched {
            let ids: Vec<AccountId> = accounts.iter().map(|a| a.id).collect();
            let bans = temp_unsched.active_bans(&ids, Utc::now()).await;
            for account in &mut accounts {
                if let Some(Some(state)) = bans.get(&account.id) {
                    account.temp_unschedulable_until = state.until();
                    account.temp_unschedulable_reason = Some(state.reason());
                }
            }
        }
        sort_for_bucket(&mut accounts, bucket);

        self.cache.set_snapshot(bucket, &accounts).await?;
        info!(%bucket, accounts = accounts.len(), "bucket rebuilt");
        Ok(accounts.len())
    }

    /// Single-account read for the router: cache first, then the system of
    /// record.
    pub async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        match self.cache.get_account(id).await {
            Ok(Some(account)) => return Ok(Some(account)),
            Ok(None) => {}
            Err(e) => warn!(account_id = id, error = %e, "account cache unavailable"),
        }
        self.accounts.get_account(id).await
    }

    /// Re-reads one account and writes it to the per-account cache entry, or
    /// drops the entry when the account is gone. Returns the current account.
    pub async fn refresh_account(&self, id: AccountId) -> Result<Option<Account>> {
        let account = self.accounts.get_account(id).await?;
        match &account {
            Some(account) => {
                if let Err(e) = self.cache.set_account(account).await {
                    warn!(account_id = id, error = %e, "account cache refresh failed");
                }
            }
            None => self.drop_account(id).await,
        }
        Ok(account)
    }

    pub async fn drop_account(&self, id: AccountId) {
        if let Err(e) = self.cache.delete_account(id).await {
            warn!(account_id = id, error = %e, "account cache delete failed");
        }
    }

    /// Best-effort; never blocks routing.
    pub async fn touch_last_used(&self, updates: &HashMap<AccountId, DateTime<Utc>>) {
        if updates.is_empty() {
            return;
        }
        if let Err(e) = self.cache.update_last_used(updates).await {
            warn!(accounts = updates.len(), error = %e, "last-used update failed");
        }
    }
}
