use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::account::AccountId;

/// Live load of one account. Never persisted; always the latest observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountLoadInfo {
    pub account_id: AccountId,
    pub current_concurrency: i64,
    pub waiting_count: i64,
}

/// Input row for a batched load query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountWithConcurrency {
    pub id: AccountId,
    pub max_concurrency: i32,
}

/// Percentage of `in_use` over `capacity`; `None` without capacity.
pub fn load_percentage(in_use: i64, capacity: i64) -> Option<f64> {
    (capacity > 0).then(|| in_use as f64 / capacity as f64 * 100.0)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformConcurrencyInfo {
    pub platform: String,
    pub current_in_use: i64,
    pub max_capacity: i64,
    pub waiting_in_queue: i64,
    pub load_percentage: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupConcurrencyInfo {
    pub group_id: i64,
    pub group_name: String,
    /// Blank when member accounts report disagreeing platforms.
    pub platform: String,
    pub current_in_use: i64,
    pub max_capacity: i64,
    pub waiting_in_queue: i64,
    pub load_percentage: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountConcurrencyInfo {
    pub account_id: AccountId,
    pub account_name: String,
    pub platform: String,
    pub group_id: i64,
    pub group_name: String,
    pub current_in_use: i64,
    pub max_capacity: i64,
    pub waiting_in_queue: i64,
    pub load_percentage: Option<f64>,
}

/// Concurrency usage aggregated by platform, group and account.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyStats {
    pub platforms: HashMap<String, PlatformConcurrencyInfo>,
    pub groups: HashMap<i64, GroupConcurrencyInfo>,
    pub accounts: HashMap<AccountId, AccountConcurrencyInfo>,
    pub collected_at: Option<DateTime<Utc>>,
}
