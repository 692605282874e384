use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use switchyard_model::{AccountId, TempUnschedState};
use tracing::warn;

use super::{TempUnschedCache, TempUnschedKeys};
use crate::deadline::{DEFAULT_STORE_TIMEOUT, with_deadline};
use crate::error::Result;

/// Extra lifetime past `until_unix` before the store drops an entry. The key
/// expiry only bounds storage; reads still check `until_unix`.
const RETENTION_AFTER_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Redis-backed [`TempUnschedCache`] storing JSON states.
#[derive(Clone)]
pub struct RedisTempUnschedCache {
    conn: ConnectionManager,
    timeout: Duration,
}

impl fmt::Debug for RedisTempUnschedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisTempUnschedCache")
            .field("connection", &"ConnectionManager")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisTempUnschedCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TempUnschedCache for RedisTempUnschedCache {
    async fn set_temp_unsched(
        &self,
        account_id: AccountId,
        state: &TempUnschedState,
    ) -> Result<()> {
        let body = serde_json::to_string(state)?;
        let remaining = (state.until_unix - Utc::now().timestamp()).max(0) as u64;
        let ttl = Duration::from_secs(remaining) + RETENTION_AFTER_EXPIRY;

        let mut conn = self.conn.clone();
        with_deadline("set_temp_unsched", self.timeout, async {
            conn.set_ex::<_, _, ()>(TempUnschedKeys::state(account_id), body, ttl.as_secs())
                .await?;
            Ok(())
        })
        .await
    }

    async fn get_temp_unsched(&self, account_id: AccountId) -> Result<Option<TempUnschedState>> {
        let key = TempUnschedKeys::state(account_id);
        let mut conn = self.conn.clone();
        let body: Option<String> = with_deadline("get_temp_unsched", self.timeout, async {
            Ok(conn.get(&key).await?)
        })
        .await?;

        let Some(body) = body else {
            return Ok(None);
        };
        match serde_json::from_str(&body) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(account_id, error = %e, "discarding corrupted temp-unsched entry");
                self.delete_temp_unsched(account_id).await?;
                Ok(None)
            }
        }
    }

    async fn get_temp_unsched_many(
        &self,
        account_ids: &[AccountId],
    ) -> Result<HashMap<AccountId, TempUnschedState>> {
        if account_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = account_ids.iter().map(|id| TempUnschedKeys::state(*id)).collect();
        let mut conn = self.conn.clone();
        let bodies: Vec<Option<String>> =
            with_deadline("get_temp_unsched_many", self.timeout, async {
                Ok(redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?)
            })
            .await?;

        let mut out = HashMap::with_capacity(account_ids.len());
        for (id, body) in account_ids.iter().zip(bodies) {
            let Some(body) = body else { continue };
            match serde_json::from_str(&body) {
                Ok(state) => {
                    out.insert(*id, state);
                }
                Err(e) => {
                    warn!(account_id = *id, error = %e, "ignoring corrupted temp-unsched entry");
                }
            }
        }
        Ok(out)
    }

    async fn delete_temp_unsched(&self, account_id: AccountId) -> Result<()> {
        let mut conn = self.conn.clone();
        with_deadline("delete_temp_unsched", self.timeout, async {
            conn.del::<_, ()>(TempUnschedKeys::state(account_id)).await?;
            Ok(())
        })
        .await
    }
}
