//! Outbox event to bucket mapping.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use switchyard_model::{
    Account, AccountId, Group, GroupId, OutboxEvent, OutboxEventType, SchedulerBucket,
};

/// What an outbox event asks the consumer to do.
#[derive(Debug, Clone, PartialEq)]
pub enum EventAction {
    /// Unknown type or an event without anything to act on.
    Ignore,
    /// Merge timestamps into the cache; no rebuild.
    ApplyLastUsed(HashMap<AccountId, DateTime<Utc>>),
    /// Re-read the account, then rebuild its current groups plus `group_ids`.
    RefreshAccount {
        account_id: AccountId,
        group_ids: BTreeSet<GroupId>,
    },
    RebuildGroups(BTreeSet<GroupId>),
    RebuildAll,
}

pub fn classify(event: &OutboxEvent) -> EventAction {
    let Some(kind) = event.kind() else {
        return EventAction::Ignore;
    };

    let mut group_ids: BTreeSet<GroupId> = event.payload_group_ids().into_iter().collect();
    group_ids.extend(event.group_id);

    match kind {
        OutboxEventType::AccountChanged | OutboxEventType::AccountGroupsChanged => {
            match event.account_id {
                Some(account_id) => EventAction::RefreshAccount {
                    account_id,
                    group_ids,
                },
                None if !group_ids.is_empty() => EventAction::RebuildGroups(group_ids),
                None => EventAction::Ignore,
            }
        }
        OutboxEventType::GroupChanged if group_ids.is_empty() => EventAction::Ignore,
        OutboxEventType::GroupChanged => EventAction::RebuildGroups(group_ids),
        OutboxEventType::AccountBulkChanged | OutboxEventType::FullRebuild => {
            EventAction::RebuildAll
        }
        OutboxEventType::AccountLastUsed => EventAction::ApplyLastUsed(event.payload_last_used()),
    }
}

/// Groups touched by an account change: those it belongs to now plus those
/// named by the event.
pub fn account_groups(
    account: Option<&Account>,
    event_groups: &BTreeSet<GroupId>,
) -> BTreeSet<GroupId> {
    let mut groups = event_groups.clone();
    if let Some(account) = account {
        groups.extend(account.group_ids());
    }
    groups
}

/// Buckets to rebuild for `group_ids`: each known group's canonical bucket
/// and every cached bucket carrying one of the group IDs.
pub fn buckets_for_groups(
    group_ids: &BTreeSet<GroupId>,
    groups: &HashMap<GroupId, Group>,
    cached: &[SchedulerBucket],
) -> BTreeSet<SchedulerBucket> {
    let mut out: BTreeSet<SchedulerBucket> = group_ids
        .iter()
        .filter_map(|id| groups.get(id))
        .map(Group::bucket)
        .collect();
    out.extend(
        cached
            .iter()
            .filter(|b| group_ids.contains(&b.group_id))
            .cloned(),
    );
    out
}
