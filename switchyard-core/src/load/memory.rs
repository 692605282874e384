use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use switchyard_model::{AccountId, AccountLoadInfo, AccountWithConcurrency};
use tokio::time::Instant;

use super::LoadTracker;
use crate::error::Result;
use crate::memory::{Availability, Expiry};

#[derive(Debug, Default)]
struct AccountLoad {
    slots: HashMap<String, Instant>,
    waiting: i64,
    waiting_expiry: Option<Expiry>,
}

impl AccountLoad {
    fn prune(&mut self) -> usize {
        let now = Instant::now();
        self.slots.retain(|_, expires| *expires > now);
        if self.waiting_expiry.is_some_and(|e| e.is_expired()) {
            self.waiting = 0;
            self.waiting_expiry = None;
        }
        self.slots.len()
    }

    fn is_idle(&self) -> bool {
        self.slots.is_empty() && self.waiting == 0
    }
}

/// Prunes `account_id` and forgets it once nothing is left to track.
fn settle(accounts: &mut HashMap<AccountId, AccountLoad>, account_id: AccountId) -> (i64, i64) {
    let Some(load) = accounts.get_mut(&account_id) else {
        return (0, 0);
    };
    let current = load.prune() as i64;
    let waiting = load.waiting;
    if load.is_idle() {
        accounts.remove(&account_id);
    }
    (current, waiting)
}

/// Process-local [`LoadTracker`].
#[derive(Clone, Default)]
pub struct InMemoryLoadTracker {
    accounts: Arc<Mutex<HashMap<AccountId, AccountLoad>>>,
    availability: Availability,
}

impl fmt::Debug for InMemoryLoadTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryLoadTracker")
            .field("accounts", &self.accounts.lock().len())
            .field("available", &self.availability.is_available())
            .finish()
    }
}

impl InMemoryLoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_availability(availability: Availability) -> Self {
        Self {
            accounts: Arc::default(),
            availability,
        }
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }
}

#[async_trait]
impl LoadTracker for InMemoryLoadTracker {
    async fn acquire_slot(
        &self,
        account_id: AccountId,
        max_concurrency: i32,
        request_id: &str,
        ttl: Duration,
    ) -> Result<bool> {
        self.availability.check("acquire_slot")?;
        let mut accounts = self.accounts.lock();
        let load = accounts.entry(account_id).or_default();
        let in_use = load.prune();

        let held = load.slots.contains_key(request_id);
        if !held && max_concurrency > 0 && in_use >= max_concurrency as usize {
            return Ok(false);
        }
        load.slots.insert(request_id.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn release_slot(&self, account_id: AccountId, request_id: &str) -> Result<()> {
        self.availability.check("release_slot")?;
        let mut accounts = self.accounts.lock();
        if let Some(load) = accounts.get_mut(&account_id) {
            load.slots.remove(request_id);
        }
        settle(&mut accounts, account_id);
        Ok(())
    }

    async fn incr_waiting(&self, account_id: AccountId, ttl: Duration) -> Result<i64> {
        self.availability.check("incr_waiting")?;
        let mut accounts = self.accounts.lock();
        let load = accounts.entry(account_id).or_default();
        load.prune();
        load.waiting += 1;
        load.waiting_expiry = Some(Expiry::after(ttl));
        Ok(load.waiting)
    }

    async fn decr_waiting(&self, account_id: AccountId) -> Result<()> {
        self.availability.check("decr_waiting")?;
        let mut accounts = self.accounts.lock();
        if let Some(load) = accounts.get_mut(&account_id) {
            load.prune();
            load.waiting = (load.waiting - 1).max(0);
        }
        settle(&mut accounts, account_id);
        Ok(())
    }

    async fn get_accounts_load_batch(
        &self,
        accounts: &[AccountWithConcurrency],
    ) -> Result<HashMap<AccountId, AccountLoadInfo>> {
        self.availability.check("get_accounts_load_batch")?;
        let mut state = self.accounts.lock();
        Ok(accounts
            .iter()
            .map(|acc| {
                let (current, waiting) = settle(&mut state, acc.id);
                (
                    acc.id,
                    AccountLoadInfo {
                        account_id: acc.id,
                        current_concurrency: current,
                        waiting_count: waiting,
                    },
                )
            })
            .collect())
    }
}
