use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::account::AccountId;
use crate::error::ModelError;

/// Kinds of mutation recorded in the scheduler outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxEventType {
    AccountChanged,
    AccountGroupsChanged,
    AccountBulkChanged,
    AccountLastUsed,
    GroupChanged,
    FullRebuild,
}

impl OutboxEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxEventType::AccountChanged => "account_changed",
            OutboxEventType::AccountGroupsChanged => "account_groups_changed",
            OutboxEventType::AccountBulkChanged => "account_bulk_changed",
            OutboxEventType::AccountLastUsed => "account_last_used",
            OutboxEventType::GroupChanged => "group_changed",
            OutboxEventType::FullRebuild => "full_rebuild",
        }
    }
}

impl fmt::Display for OutboxEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxEventType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "account_changed" => OutboxEventType::AccountChanged,
            "account_groups_changed" => OutboxEventType::AccountGroupsChanged,
            "account_bulk_changed" => OutboxEventType::AccountBulkChanged,
            "account_last_used" => OutboxEventType::AccountLastUsed,
            "group_changed" => OutboxEventType::GroupChanged,
            "full_rebuild" => OutboxEventType::FullRebuild,
            other => return Err(ModelError::UnknownEventType(other.to_string())),
        })
    }
}

/// A row of the append-only outbox log.
///
/// `id` is the only ordering guarantee. `created_at` reflects the writer's
/// clock and transactions may commit out of wall-clock order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: i64,
    /// Raw type string; rows written by newer releases may carry types this
    /// build does not know.
    pub event_type: String,
    pub account_id: Option<AccountId>,
    pub group_id: Option<i64>,
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn kind(&self) -> Option<OutboxEventType> {
        self.event_type.parse().ok()
    }

    /// Group IDs listed under `payload.group_ids`, typically the memberships
    /// an account had before the change.
    pub fn payload_group_ids(&self) -> Vec<i64> {
        self.payload
            .as_ref()
            .and_then(|p| p.get("group_ids"))
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
            .unwrap_or_default()
    }

    /// Last-used timestamps carried by an `account_last_used` event.
    ///
    /// Reads `payload.last_used` (`{"<account id>": <unix seconds>}`); when
    /// absent, falls back to the event's own account and creation time.
    pub fn payload_last_used(&self) -> HashMap<AccountId, DateTime<Utc>> {
        let mut out = HashMap::new();
        if let Some(map) = self
            .payload
            .as_ref()
            .and_then(|p| p.get("last_used"))
            .and_then(Value::as_object)
        {
            for (raw_id, raw_ts) in map {
                let Ok(id) = raw_id.parse::<AccountId>() else {
                    continue;
                };
                if let Some(ts) = raw_ts
                    .as_i64()
                    .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
                {
                    out.insert(id, ts);
                }
            }
        }
        if out.is_empty()
            && let Some(id) = self.account_id
        {
            out.insert(id, self.created_at);
        }
        out
    }
}

/// An outbox row about to be appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOutboxEvent {
    pub event_type: OutboxEventType,
    pub account_id: Option<AccountId>,
    pub group_id: Option<i64>,
    pub payload: Option<Value>,
}

impl NewOutboxEvent {
    pub fn new(event_type: OutboxEventType) -> Self {
        Self {
            event_type,
            account_id: None,
            group_id: None,
            payload: None,
        }
    }

    pub fn account_changed(account_id: AccountId) -> Self {
        Self::new(OutboxEventType::AccountChanged).with_account(account_id)
    }

    pub fn account_groups_changed(
        account_id: AccountId,
        affected_groups: impl IntoIterator<Item = i64>,
    ) -> Self {
        let ids: Vec<i64> = affected_groups.into_iter().collect();
        Self::new(OutboxEventType::AccountGroupsChanged)
            .with_account(account_id)
            .with_payload(json!({ "group_ids": ids }))
    }

    pub fn group_changed(group_id: i64) -> Self {
        Self::new(OutboxEventType::GroupChanged).with_group(group_id)
    }

    pub fn last_used(updates: &HashMap<AccountId, DateTime<Utc>>) -> Self {
        let map: serde_json::Map<String, Value> = updates
            .iter()
            .map(|(id, at)| (id.to_string(), Value::from(at.timestamp())))
            .collect();
        Self::new(OutboxEventType::AccountLastUsed)
            .with_payload(json!({ "last_used": map }))
    }

    pub fn with_account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn with_group(mut self, group_id: i64) -> Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}
