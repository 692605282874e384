#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use switchyard_core::ports::{AccountRepository, OutboxRepository, outbox_page_size};
use switchyard_core::{Result, SchedulerError};
use switchyard_model::{
    Account, AccountGroup, AccountId, AccountStatus, Group, GroupId, GroupStatus,
    NewOutboxEvent, OutboxEvent, SchedulerBucket, SchedulerMode,
};

pub const PLATFORM: &str = "anthropic";

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    groups: BTreeMap<GroupId, Group>,
    outbox: Vec<OutboxEvent>,
}

/// In-memory system of record. Writes append outbox events the way the
/// PostgreSQL adapter does.
#[derive(Clone, Default)]
pub struct FakeSource {
    tables: Arc<Mutex<Tables>>,
    failing: Arc<AtomicBool>,
    account_reads: Arc<AtomicUsize>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of bucket reads served so far.
    pub fn account_reads(&self) -> usize {
        self.account_reads.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(SchedulerError::Internal("system of record offline".into()))
        } else {
            Ok(())
        }
    }

    pub fn add_group(&self, id: GroupId, mode: SchedulerMode) -> Group {
        let group = Group {
            id,
            name: format!("group-{id}"),
            platform: PLATFORM.into(),
            mode,
            status: GroupStatus::Active,
        };
        self.tables.lock().groups.insert(id, group.clone());
        group
    }

    pub fn update_group(&self, id: GroupId, mode: SchedulerMode) {
        let mut tables = self.tables.lock();
        if let Some(group) = tables.groups.get_mut(&id) {
            group.mode = mode;
        }
        push(&mut tables, NewOutboxEvent::group_changed(id));
    }

    /// Inserts or replaces an account with memberships `groups` (all at
    /// priority 0) and records `account_changed`.
    pub fn upsert_account(&self, id: AccountId, concurrency: i32, groups: &[GroupId]) -> Account {
        let mut tables = self.tables.lock();
        let memberships = groups
            .iter()
            .map(|g| AccountGroup {
                group_id: *g,
                name: tables
                    .groups
                    .get(g)
                    .map(|grp| grp.name.clone())
                    .unwrap_or_default(),
                platform: PLATFORM.into(),
                priority: 0,
            })
            .collect();
        let account = Account {
            id,
            name: format!("account-{id}"),
            platform: PLATFORM.into(),
            concurrency,
            priority: 50,
            status: AccountStatus::Active,
            schedulable: true,
            groups: memberships,
            has_error: false,
            rate_limit_reset_at: None,
            temp_unschedulable_until: None,
            temp_unschedulable_reason: None,
            last_used_at: None,
        };
        tables.accounts.insert(id, account.clone());
        push(&mut tables, NewOutboxEvent::account_changed(id));
        account
    }

    pub fn modify_account(&self, id: AccountId, change: impl FnOnce(&mut Account)) {
        let mut tables = self.tables.lock();
        if let Some(account) = tables.accounts.get_mut(&id) {
            change(account);
        }
        push(&mut tables, NewOutboxEvent::account_changed(id));
    }

    pub fn set_account_groups(&self, id: AccountId, groups: &[GroupId]) {
        let mut tables = self.tables.lock();
        let Some(mut account) = tables.accounts.get(&id).cloned() else {
            return;
        };
        let mut affected: Vec<GroupId> = account.group_ids().collect();
        affected.extend_from_slice(groups);
        account.groups = groups
            .iter()
            .map(|g| AccountGroup {
                group_id: *g,
                name: format!("group-{g}"),
                platform: PLATFORM.into(),
                priority: 0,
            })
            .collect();
        tables.accounts.insert(id, account);
        push(&mut tables, NewOutboxEvent::account_groups_changed(id, affected));
    }

    pub fn delete_account(&self, id: AccountId) {
        let mut tables = self.tables.lock();
        let Some(account) = tables.accounts.remove(&id) else {
            return;
        };
        let groups: Vec<GroupId> = account.group_ids().collect();
        push(&mut tables, NewOutboxEvent::account_groups_changed(id, groups));
    }

    pub fn push_event(&self, event: NewOutboxEvent) -> i64 {
        push(&mut self.tables.lock(), event)
    }

    /// Appends a row with a raw event type string.
    pub fn push_raw(&self, event_type: &str) -> i64 {
        let mut tables = self.tables.lock();
        let id = tables.outbox.len() as i64 + 1;
        tables.outbox.push(OutboxEvent {
            id,
            event_type: event_type.to_string(),
            account_id: None,
            group_id: None,
            payload: None,
            created_at: Utc::now(),
        });
        id
    }

    pub fn account(&self, id: AccountId) -> Option<Account> {
        self.tables.lock().accounts.get(&id).cloned()
    }

    pub fn bucket(&self, group_id: GroupId) -> SchedulerBucket {
        self.tables
            .lock()
            .groups
            .get(&group_id)
            .map(Group::bucket)
            .unwrap_or_else(|| SchedulerBucket::new(group_id, PLATFORM, SchedulerMode::Single))
    }
}

fn push(tables: &mut Tables, event: NewOutboxEvent) -> i64 {
    let id = tables.outbox.len() as i64 + 1;
    tables.outbox.push(OutboxEvent {
        id,
        event_type: event.event_type.to_string(),
        account_id: event.account_id,
        group_id: event.group_id,
        payload: event.payload,
        created_at: Utc::now(),
    });
    id
}

#[async_trait]
impl AccountRepository for FakeSource {
    async fn list_schedulable_accounts(&self, bucket: &SchedulerBucket) -> Result<Vec<Account>> {
        self.check()?;
        self.account_reads.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.lock();
        let group_active = tables
            .groups
            .get(&bucket.group_id)
            .is_some_and(|g| g.status == GroupStatus::Active);
        if !group_active {
            return Ok(Vec::new());
        }
        Ok(tables
            .accounts
            .values()
            .filter(|a| {
                a.in_group(bucket.group_id)
                    && a.platform == bucket.platform
                    && a.status == AccountStatus::Active
                    && a.schedulable
            })
            .cloned()
            .collect())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        self.check()?;
        Ok(self.tables.lock().accounts.get(&id).cloned())
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        self.check()?;
        Ok(self.tables.lock().groups.get(&id).cloned())
    }

    async fn list_groups(&self) -> Result<Vec<Group>> {
        self.check()?;
        Ok(self.tables.lock().groups.values().cloned().collect())
    }
}

#[async_trait]
impl OutboxRepository for FakeSource {
    async fn list_after(&self, after_id: i64, limit: i64) -> Result<Vec<OutboxEvent>> {
        self.check()?;
        let limit = outbox_page_size(limit) as usize;
        Ok(self
            .tables
            .lock()
            .outbox
            .iter()
            .filter(|e| e.id > after_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn max_id(&self) -> Result<i64> {
        self.check()?;
        Ok(self.tables.lock().outbox.last().map_or(0, |e| e.id))
    }
}

/// Account IDs in order, for compact assertions.
pub fn ids(accounts: &[Account]) -> Vec<AccountId> {
    accounts.iter().map(|a| a.id).collect()
}

pub fn load_map_is_zero(map: &HashMap<AccountId, switchyard_model::AccountLoadInfo>) -> bool {
    map.values()
        .all(|l| l.current_concurrency == 0 && l.waiting_count == 0)
}
