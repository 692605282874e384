use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use switchyard_model::{Account, AccountId, FailureMode, TempUnschedState};
use tracing::{debug, info, warn};

use super::rules::{TempUnschedRule, first_match};
use super::{TempUnschedCache, TimeoutCounter};
use crate::cache::SchedulerCache;
use crate::error::Result;

/// Longest error body kept on a ban.
const MAX_ERROR_MESSAGE_CHARS: usize = 512;

/// Rule index recorded for bans issued by the timeout policy.
pub const TIMEOUT_RULE_INDEX: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempUnschedPolicy {
    pub rules: Vec<TempUnschedRule>,
    /// Timeouts within the window that trigger a ban; `0` disables.
    pub timeout_threshold: u32,
    pub timeout_window_minutes: u32,
    pub timeout_ban_minutes: u32,
}

impl Default for TempUnschedPolicy {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            timeout_threshold: 3,
            timeout_window_minutes: 10,
            timeout_ban_minutes: 10,
        }
    }
}

/// Writes and evaluates temporary bans.
#[derive(Clone)]
pub struct TempUnschedService {
    store: Arc<dyn TempUnschedCache>,
    counter: TimeoutCounter,
    scheduler_cache: Option<Arc<dyn SchedulerCache>>,
    policy: TempUnschedPolicy,
    failure_mode: FailureMode,
}

impl std::fmt::Debug for TempUnschedService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TempUnschedService")
            .field("policy", &self.policy)
            .field("failure_mode", &self.failure_mode)
            .finish_non_exhaustive()
    }
}

fn truncate_chars(message: &str, max: usize) -> String {
    match message.char_indices().nth(max) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}

impl TempUnschedService {
    pub fn new(store: Arc<dyn TempUnschedCache>, counter: TimeoutCounter) -> Self {
        Self {
            store,
            counter,
            scheduler_cache: None,
            policy: TempUnschedPolicy::default(),
            failure_mode: FailureMode::default(),
        }
    }

    /// Keeps the per-account snapshot entry in step with new bans.
    pub fn with_scheduler_cache(mut self, cache: Arc<dyn SchedulerCache>) -> Self {
        self.scheduler_cache = Some(cache);
        self
    }

    pub fn with_policy(mut self, policy: TempUnschedPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn policy(&self) -> &TempUnschedPolicy {
        &self.policy
    }

    pub fn counter(&self) -> &TimeoutCounter {
        &self.counter
    }

    /// Bans `account` when an upstream error matches a configured rule.
    /// Returns the written state.
    pub async fn handle_upstream_error(
        &self,
        account: &Account,
        status: u16,
        body: &str,
    ) -> Result<Option<TempUnschedState>> {
        let Some((index, rule, keyword)) = first_match(&self.policy.rules, status, body) else {
            return Ok(None);
        };
        let now = Utc::now();
        let ban = ChronoDuration::minutes(i64::from(rule.duration_minutes));
        let state = TempUnschedState {
            until_unix: (now + ban).timestamp(),
            triggered_at_unix: now.timestamp(),
            status_code: status,
            matched_keyword: keyword.to_string(),
            rule_index: index as i32,
            error_message: truncate_chars(body, MAX_ERROR_MESSAGE_CHARS),
        };
        self.ban(account, &state).await?;
        Ok(Some(state))
    }

    /// Counts an upstream timeout and bans the account once the threshold is
    /// reached inside the window. The counter starts over after a ban.
    pub async fn record_timeout(&self, account: &Account) -> Result<Option<TempUnschedState>> {
        let threshold = self.policy.timeout_threshold;
        if threshold == 0 {
            return Ok(None);
        }
        let window = self.policy.timeout_window_minutes;
        let count = self.counter.increment_timeout_count(account.id, window).await?;
        debug!(account_id = account.id, count, threshold, "upstream timeout recorded");
        if count < i64::from(threshold) {
            return Ok(None);
        }

        let now = Utc::now();
        let ban = ChronoDuration::minutes(i64::from(self.policy.timeout_ban_minutes));
        let state = TempUnschedState {
            until_unix: (now + ban).timestamp(),
            triggered_at_unix: now.timestamp(),
            status_code: 504,
            matched_keyword: "timeout".to_string(),
            rule_index: TIMEOUT_RULE_INDEX,
            error_message: format!("{count} upstream timeouts within {window} minutes"),
        };
        self.ban(account, &state).await?;
        if let Err(e) = self.counter.reset_timeout_count(account.id).await {
            warn!(account_id = account.id, error = %e, "timeout counter reset failed");
        }
        Ok(Some(state))
    }

    async fn ban(&self, account: &Account, state: &TempUnschedState) -> Result<()> {
        self.store.set_temp_unsched(account.id, state).await?;
        info!(
            account_id = account.id,
            status = state.status_code,
            keyword = %state.matched_keyword,
            rule_index = state.rule_index,
            until = state.until_unix,
            "account temporarily unschedulable"
        );

        if let Some(cache) = &self.scheduler_cache {
            let mut copy = account.clone();
            copy.temp_unschedulable_until = state.until();
            copy.temp_unschedulable_reason = Some(state.reason());
            if let Err(e) = cache.set_account(&copy).await {
                warn!(account_id = account.id, error = %e, "cached account not updated with ban");
            }
        }
        Ok(())
    }

    /// `false` only for an account with a ban that has not yet passed.
    /// Store failures resolve per the configured [`FailureMode`].
    pub async fn is_schedulable(&self, account_id: AccountId, now: DateTime<Utc>) -> bool {
        match self.store.get_temp_unsched(account_id).await {
            Ok(Some(state)) => !state.is_active_at(now),
            Ok(None) => true,
            Err(e) => {
                let allow = self.failure_mode.degraded_allow();
                warn!(
                    account_id,
                    error = %e,
                    mode = %self.failure_mode,
                    allow,
                    "temp-unsched lookup failed"
                );
                allow
            }
        }
    }

    /// Accounts among `ids` that must be excluded at `now`, with their ban.
    /// A failed lookup is listed (without a state) only when failing closed.
    pub async fn active_bans(
        &self,
        ids: &[AccountId],
        now: DateTime<Utc>,
    ) -> HashMap<AccountId, Option<TempUnschedState>> {
        if ids.is_empty() {
            return HashMap::new();
        }
        match self.store.get_temp_unsched_many(ids).await {
            Ok(states) => states
                .into_iter()
                .filter(|(_, state)| state.is_active_at(now))
                .map(|(id, state)| (id, Some(state)))
                .collect(),
            Err(e) => {
                warn!(
                    accounts = ids.len(),
                    error = %e,
                    mode = %self.failure_mode,
                    "temp-unsched lookup failed"
                );
                if self.failure_mode.degraded_allow() {
                    HashMap::new()
                } else {
                    ids.iter().map(|id| (*id, None)).collect()
                }
            }
        }
    }

    /// Manual reset: lifts the ban and clears the timeout counter.
    pub async fn clear(&self, account_id: AccountId) -> Result<()> {
        self.store.delete_temp_unsched(account_id).await?;
        self.counter.reset_timeout_count(account_id).await?;
        if let Some(cache) = &self.scheduler_cache {
            match cache.get_account(account_id).await {
                Ok(Some(mut account)) => {
                    account.temp_unschedulable_until = None;
                    account.temp_unschedulable_reason = None;
                    if let Err(e) = cache.set_account(&account).await {
                        warn!(account_id, error = %e, "cached account not cleared");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(account_id, error = %e, "cached account not cleared"),
            }
        }
        info!(account_id, "temp-unsched state cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
