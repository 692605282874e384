use std::sync::Arc;
use std::time::Duration;

use switchyard_model::AccountId;

use super::TempUnschedKeys;
use crate::counter::CounterStore;
use crate::error::Result;

/// Shortest window the counter accepts, whatever the configuration says.
pub const MIN_TIMEOUT_WINDOW: Duration = Duration::from_secs(60);

/// Per-account count of upstream timeouts within a fixed window.
///
/// The window starts at the first timeout and is not extended by later ones;
/// once it lapses the next timeout counts as 1 again.
#[derive(Clone)]
pub struct TimeoutCounter {
    store: Arc<dyn CounterStore>,
}

impl std::fmt::Debug for TimeoutCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutCounter").finish_non_exhaustive()
    }
}

impl TimeoutCounter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    pub fn window(window_minutes: u32) -> Duration {
        Duration::from_secs(u64::from(window_minutes) * 60).max(MIN_TIMEOUT_WINDOW)
    }

    pub async fn increment_timeout_count(
        &self,
        account_id: AccountId,
        window_minutes: u32,
    ) -> Result<i64> {
        let tick = self
            .store
            .incr_with_ttl(
                &TempUnschedKeys::timeout_count(account_id),
                Self::window(window_minutes),
            )
            .await?;
        Ok(tick.count)
    }

    pub async fn get_timeout_count(&self, account_id: AccountId) -> Result<i64> {
        self.store
            .get_count(&TempUnschedKeys::timeout_count(account_id))
            .await
    }

    pub async fn reset_timeout_count(&self, account_id: AccountId) -> Result<()> {
        self.store
            .reset(&TempUnschedKeys::timeout_count(account_id))
            .await
    }

    pub async fn get_timeout_count_ttl(&self, account_id: AccountId) -> Result<Option<Duration>> {
        self.store
            .ttl(&TempUnschedKeys::timeout_count(account_id))
            .await
    }
}
