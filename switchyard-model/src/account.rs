use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

pub type AccountId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Disabled,
}

impl AccountStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Disabled => "disabled",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccountStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "disabled" => Ok(AccountStatus::Disabled),
            other => Err(ModelError::UnknownVariant {
                kind: "account status",
                value: other.to_string(),
            }),
        }
    }
}

/// Group membership as seen from the account side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountGroup {
    pub group_id: i64,
    #[serde(default)]
    pub name: String,
    /// Platform label of the group. Upstream data is not guaranteed to agree
    /// with the account's own platform.
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub priority: i32,
}

/// An upstream provider account as the scheduler sees it.
///
/// Instances held by the snapshot cache are copies; the system of record is
/// the only authority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub platform: String,
    /// Maximum simultaneous in-flight requests. A capacity, not a counter.
    pub concurrency: i32,
    pub priority: i32,
    pub status: AccountStatus,
    pub schedulable: bool,
    #[serde(default)]
    pub groups: Vec<AccountGroup>,
    #[serde(default)]
    pub has_error: bool,
    #[serde(default)]
    pub rate_limit_reset_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub temp_unschedulable_until: Option<DateTime<Utc>>,
    #[serde(default)]
    pub temp_unschedulable_reason: Option<String>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Account {
    pub fn group_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.groups.iter().map(|g| g.group_id)
    }

    pub fn in_group(&self, group_id: i64) -> bool {
        self.groups.iter().any(|g| g.group_id == group_id)
    }

    pub fn is_rate_limited_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.rate_limit_reset_at, Some(reset) if reset > now)
    }

    /// A ban whose `until` lies in the past is equivalent to no ban.
    pub fn is_temp_unschedulable_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.temp_unschedulable_until, Some(until) if until > now)
    }

    /// Runtime eligibility from the flags carried on the account itself.
    pub fn is_schedulable_at(&self, now: DateTime<Utc>) -> bool {
        self.status == AccountStatus::Active
            && self.schedulable
            && !self.has_error
            && !self.is_rate_limited_at(now)
            && !self.is_temp_unschedulable_at(now)
    }

    /// Priority of the account inside `group_id`, falling back to the
    /// account-wide priority when the membership carries none.
    pub fn priority_in(&self, group_id: i64) -> i32 {
        self.groups
            .iter()
            .find(|g| g.group_id == group_id)
            .map(|g| g.priority)
            .filter(|p| *p != 0)
            .unwrap_or(self.priority)
    }
}
