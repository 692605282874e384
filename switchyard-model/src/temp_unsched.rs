use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A time-bounded scheduling ban recorded against an account.
///
/// Expiry is lazy: nothing sweeps stale entries, and a state whose
/// `until_unix` has passed is treated exactly like an absent one. Keep it that
/// way; an active sweeper would race with writers re-banning the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempUnschedState {
    pub until_unix: i64,
    pub triggered_at_unix: i64,
    pub status_code: u16,
    #[serde(default)]
    pub matched_keyword: String,
    /// Index of the rule that fired, `-1` for the timeout policy.
    #[serde(default)]
    pub rule_index: i32,
    #[serde(default)]
    pub error_message: String,
}

impl TempUnschedState {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.until_unix > now.timestamp()
    }

    pub fn until(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.until_unix, 0)
    }

    /// Human readable reason stored next to the account.
    pub fn reason(&self) -> String {
        if self.matched_keyword.is_empty() {
            format!("status {}", self.status_code)
        } else {
            format!("status {} matched {:?}", self.status_code, self.matched_keyword)
        }
    }
}
