use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use switchyard_model::load::load_percentage;
use switchyard_model::{
    Account, AccountConcurrencyInfo, AccountGroup, AccountId, AccountLoadInfo,
    AccountWithConcurrency, ConcurrencyStats, FailureMode, GroupConcurrencyInfo,
    PlatformConcurrencyInfo,
};
use tracing::{debug, warn};

use super::{DEFAULT_SLOT_TTL, LoadTracker};

/// Accounts per load-batch round trip.
pub const DEFAULT_LOAD_BATCH_CHUNK: usize = 200;

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A slot was claimed; release it when the request finishes.
    Acquired,
    /// The account is at capacity.
    Full,
    /// The store failed and the request proceeds without a slot.
    Untracked,
    /// The store failed and the request is refused.
    Refused,
}

impl Admission {
    pub fn is_admitted(self) -> bool {
        matches!(self, Admission::Acquired | Admission::Untracked)
    }
}

/// Admission and load reporting on top of a [`LoadTracker`].
#[derive(Clone)]
pub struct ConcurrencyService {
    tracker: Arc<dyn LoadTracker>,
    failure_mode: FailureMode,
    chunk_size: usize,
    slot_ttl: Duration,
}

impl std::fmt::Debug for ConcurrencyService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyService")
            .field("failure_mode", &self.failure_mode)
            .field("chunk_size", &self.chunk_size)
            .field("slot_ttl", &self.slot_ttl)
            .finish_non_exhaustive()
    }
}

impl ConcurrencyService {
    pub fn new(tracker: Arc<dyn LoadTracker>) -> Self {
        Self {
            tracker,
            failure_mode: FailureMode::default(),
            chunk_size: DEFAULT_LOAD_BATCH_CHUNK,
            slot_ttl: DEFAULT_SLOT_TTL,
        }
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_slot_ttl(mut self, ttl: Duration) -> Self {
        self.slot_ttl = ttl;
        self
    }

    pub fn tracker(&self) -> &Arc<dyn LoadTracker> {
        &self.tracker
    }

    /// Load for every distinct account in `accounts`, never failing.
    ///
    /// Duplicate IDs are queried once with the largest capacity seen. A chunk
    /// whose round trip fails reports zero load for its accounts.
    pub async fn get_accounts_load(
        &self,
        accounts: &[AccountWithConcurrency],
    ) -> HashMap<AccountId, AccountLoadInfo> {
        let batch = dedupe_max_capacity(accounts);
        let mut out: HashMap<AccountId, AccountLoadInfo> = HashMap::with_capacity(batch.len());

        for chunk in batch.chunks(self.chunk_size) {
            match self.tracker.get_accounts_load_batch(chunk).await {
                Ok(part) => out.extend(part),
                Err(e) => {
                    warn!(
                        accounts = chunk.len(),
                        error = %e,
                        "load batch failed, reporting zero load"
                    );
                }
            }
        }
        for acc in &batch {
            out.entry(acc.id).or_insert(AccountLoadInfo {
                account_id: acc.id,
                ..AccountLoadInfo::default()
            });
        }
        out
    }

    /// Claims a slot on `account_id`; store failures resolve per the
    /// configured [`FailureMode`].
    pub async fn try_admit(
        &self,
        account_id: AccountId,
        max_concurrency: i32,
        request_id: &str,
    ) -> Admission {
        match self
            .tracker
            .acquire_slot(account_id, max_concurrency, request_id, self.slot_ttl)
            .await
        {
            Ok(true) => Admission::Acquired,
            Ok(false) => {
                debug!(account_id, max_concurrency, "account at capacity");
                Admission::Full
            }
            Err(e) => {
                warn!(
                    account_id,
                    error = %e,
                    mode = %self.failure_mode,
                    "slot acquisition failed"
                );
                if self.failure_mode.is_open() {
                    Admission::Untracked
                } else {
                    Admission::Refused
                }
            }
        }
    }

    /// Best-effort; an unreleased slot still expires with its TTL.
    pub async fn release(&self, account_id: AccountId, request_id: &str) {
        if let Err(e) = self.tracker.release_slot(account_id, request_id).await {
            warn!(account_id, error = %e, "slot release failed");
        }
    }

    /// Concurrency usage aggregated by platform, group and account.
    pub async fn concurrency_stats(
        &self,
        accounts: &[Account],
        platform_filter: Option<&str>,
        group_filter: Option<i64>,
    ) -> ConcurrencyStats {
        let accounts: Vec<&Account> = accounts
            .iter()
            .filter(|a| a.id > 0)
            .filter(|a| platform_filter.is_none_or(|p| a.platform == p))
            .collect();

        let collected_at = Utc::now();
        let batch: Vec<AccountWithConcurrency> = accounts
            .iter()
            .map(|a| AccountWithConcurrency {
                id: a.id,
                max_concurrency: a.concurrency,
            })
            .collect();
        let loads = self.get_accounts_load(&batch).await;

        aggregate(&accounts, &loads, group_filter, collected_at)
    }
}

/// One entry per ID, keeping the largest capacity. Never under-reports.
pub(crate) fn dedupe_max_capacity(
    accounts: &[AccountWithConcurrency],
) -> Vec<AccountWithConcurrency> {
    let mut by_id: HashMap<AccountId, i32> = HashMap::with_capacity(accounts.len());
    let mut order = Vec::with_capacity(accounts.len());
    for acc in accounts.iter().filter(|a| a.id > 0) {
        match by_id.get_mut(&acc.id) {
            Some(max) => *max = (*max).max(acc.max_concurrency),
            None => {
                by_id.insert(acc.id, acc.max_concurrency);
                order.push(acc.id);
            }
        }
    }
    order
        .into_iter()
        .map(|id| AccountWithConcurrency {
            id,
            max_concurrency: by_id[&id],
        })
        .collect()
}

fn add_to_group(
    groups: &mut HashMap<i64, GroupConcurrencyInfo>,
    membership: &AccountGroup,
    capacity: i64,
    in_use: i64,
    waiting: i64,
) {
    let info = groups
        .entry(membership.group_id)
        .or_insert_with(|| GroupConcurrencyInfo {
            group_id: membership.group_id,
            group_name: membership.name.clone(),
            platform: membership.platform.clone(),
            ..GroupConcurrencyInfo::default()
        });
    if info.group_name.is_empty() && !membership.name.is_empty() {
        info.group_name = membership.name.clone();
    }
    // Groups are platform-scoped; a disagreeing member blanks the label.
    if !info.platform.is_empty()
        && !membership.platform.is_empty()
        && info.platform != membership.platform
    {
        info.platform.clear();
    }
    info.max_capacity += capacity;
    info.current_in_use += in_use;
    info.waiting_in_queue += waiting;
}

/// Folds per-account load into platform, group and account views.
///
/// Aggregate percentages are recomputed from summed capacity and usage. With
/// no `group_filter` an account contributes to every group it belongs to.
pub(crate) fn aggregate(
    accounts: &[&Account],
    loads: &HashMap<AccountId, AccountLoadInfo>,
    group_filter: Option<i64>,
    collected_at: DateTime<Utc>,
) -> ConcurrencyStats {
    let mut stats = ConcurrencyStats {
        collected_at: Some(collected_at),
        ..ConcurrencyStats::default()
    };
    let group_filter = group_filter.filter(|g| *g > 0);
    let capacities: HashMap<AccountId, i32> = dedupe_max_capacity(
        &accounts
            .iter()
            .map(|a| AccountWithConcurrency {
                id: a.id,
                max_concurrency: a.concurrency,
            })
            .collect::<Vec<_>>(),
    )
    .into_iter()
    .map(|a| (a.id, a.max_concurrency))
    .collect();
    let mut seen = HashSet::with_capacity(accounts.len());

    for account in accounts {
        let matched = match group_filter {
            Some(group_id) => match account.groups.iter().find(|g| g.group_id == group_id) {
                Some(group) => Some(group),
                None => continue,
            },
            None => None,
        };
        if !seen.insert(account.id) {
            continue;
        }

        let load = loads.get(&account.id).copied().unwrap_or_default();
        let (in_use, waiting) = (load.current_concurrency, load.waiting_count);
        let capacity = i64::from(
            capacities
                .get(&account.id)
                .copied()
                .unwrap_or(account.concurrency),
        );

        let display = matched.or_else(|| account.groups.first());
        stats.accounts.insert(
            account.id,
            AccountConcurrencyInfo {
                account_id: account.id,
                account_name: account.name.clone(),
                platform: account.platform.clone(),
                group_id: display.map(|g| g.group_id).unwrap_or_default(),
                group_name: display.map(|g| g.name.clone()).unwrap_or_default(),
                current_in_use: in_use,
                max_capacity: capacity,
                waiting_in_queue: waiting,
                load_percentage: load_percentage(in_use, capacity),
            },
        );

        if !account.platform.is_empty() {
            let platform = stats
                .platforms
                .entry(account.platform.clone())
                .or_insert_with(|| PlatformConcurrencyInfo {
                    platform: account.platform.clone(),
                    ..PlatformConcurrencyInfo::default()
                });
            platform.max_capacity += capacity;
            platform.current_in_use += in_use;
            platform.waiting_in_queue += waiting;
        }

        match matched {
            Some(group) => add_to_group(&mut stats.groups, group, capacity, in_use, waiting),
            None => {
                for group in account.groups.iter().filter(|g| g.group_id > 0) {
                    add_to_group(&mut stats.groups, group, capacity, in_use, waiting);
                }
            }
        }
    }

    for info in stats.platforms.values_mut() {
        info.load_percentage = load_percentage(info.current_in_use, info.max_capacity);
    }
    for info in stats.groups.values_mut() {
        info.load_percentage = load_percentage(info.current_in_use, info.max_capacity);
    }
    stats
}
