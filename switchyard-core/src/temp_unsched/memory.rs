use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use switchyard_model::{AccountId, TempUnschedState};

use super::TempUnschedCache;
use crate::error::Result;
use crate::memory::Availability;

/// Process-local [`TempUnschedCache`]. Entries are kept until overwritten or
/// deleted; expiry is decided by the reader.
#[derive(Clone, Default)]
pub struct InMemoryTempUnschedCache {
    states: Arc<Mutex<HashMap<AccountId, TempUnschedState>>>,
    availability: Availability,
}

impl fmt::Debug for InMemoryTempUnschedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryTempUnschedCache")
            .field("entries", &self.states.lock().len())
            .field("available", &self.availability.is_available())
            .finish()
    }
}

impl InMemoryTempUnschedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_availability(availability: Availability) -> Self {
        Self {
            states: Arc::default(),
            availability,
        }
    }

    pub fn availability(&self) -> &Availability {
        &self.availability
    }
}

#[async_trait]
impl TempUnschedCache for InMemoryTempUnschedCache {
    async fn set_temp_unsched(
        &self,
        account_id: AccountId,
        state: &TempUnschedState,
    ) -> Result<()> {
        self.availability.check("set_temp_unsched")?;
        self.states.lock().insert(account_id, state.clone());
        Ok(())
    }

    async fn get_temp_unsched(&self, account_id: AccountId) -> Result<Option<TempUnschedState>> {
        self.availability.check("get_temp_unsched")?;
        Ok(self.states.lock().get(&account_id).cloned())
    }

    async fn get_temp_unsched_many(
        &self,
        account_ids: &[AccountId],
    ) -> Result<HashMap<AccountId, TempUnschedState>> {
        self.availability.check("get_temp_unsched_many")?;
        let states = self.states.lock();
        Ok(account_ids
            .iter()
            .filter_map(|id| states.get(id).map(|state| (*id, state.clone())))
            .collect())
    }

    async fn delete_temp_unsched(&self, account_id: AccountId) -> Result<()> {
        self.availability.check("delete_temp_unsched")?;
        self.states.lock().remove(&account_id);
        Ok(())
    }
}
