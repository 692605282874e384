use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use switchyard_model::{AccountId, AccountLoadInfo, AccountWithConcurrency};

use super::{LoadKeys, LoadTracker};
use crate::counter::ttl_millis;
use crate::deadline::{DEFAULT_STORE_TIMEOUT, with_deadline};
use crate::error::{Result, SchedulerError};

mod scripts {
    use std::sync::LazyLock;

    use redis::Script;

    /// KEYS[1]: slot set. ARGV: ttl ms, max, request id.
    pub static ACQUIRE_SLOT: LazyLock<Script> = LazyLock::new(|| {
        Script::new(
            r#"
            local t = redis.call('TIME')
            local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
            local ttl = tonumber(ARGV[1])
            local max = tonumber(ARGV[2])
            redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now)
            local held = redis.call('ZSCORE', KEYS[1], ARGV[3])
            if not held and max > 0 and redis.call('ZCARD', KEYS[1]) >= max then
                return 0
            end
            redis.call('ZADD', KEYS[1], now + ttl, ARGV[3])
            redis.call('PEXPIRE', KEYS[1], ttl)
            return 1
            "#,
        )
    });

    /// KEYS: slot set and waiting counter per account, in pairs.
    /// Returns `{in_use, waiting}` per pair.
    pub static LOAD_BATCH: LazyLock<Script> = LazyLock::new(|| {
        Script::new(
            r#"
            local t = redis.call('TIME')
            local now = tonumber(t[1]) * 1000 + math.floor(tonumber(t[2]) / 1000)
            local out = {}
            for i = 1, #KEYS, 2 do
                redis.call('ZREMRANGEBYSCORE', KEYS[i], '-inf', now)
                table.insert(out, redis.call('ZCARD', KEYS[i]))
                table.insert(out, tonumber(redis.call('GET', KEYS[i + 1]) or '0'))
            end
            return out
            "#,
        )
    });

    /// KEYS[1]: waiting counter. ARGV[1]: ttl ms.
    pub static INCR_WAITING: LazyLock<Script> = LazyLock::new(|| {
        Script::new(
            r#"
            local count = redis.call('INCR', KEYS[1])
            redis.call('PEXPIRE', KEYS[1], ARGV[1])
            return count
            "#,
        )
    });

    pub static DECR_WAITING: LazyLock<Script> = LazyLock::new(|| {
        Script::new(
            r#"
            local count = tonumber(redis.call('GET', KEYS[1]) or '0')
            if count <= 1 then
                redis.call('DEL', KEYS[1])
                return 0
            end
            return redis.call('DECR', KEYS[1])
            "#,
        )
    });
}

/// Redis-backed [`LoadTracker`]. Slots are sorted-set members scored by
/// their expiry in milliseconds on the Redis server clock.
#[derive(Clone)]
pub struct RedisLoadTracker {
    conn: ConnectionManager,
    timeout: Duration,
}

impl fmt::Debug for RedisLoadTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisLoadTracker")
            .field("connection", &"ConnectionManager")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisLoadTracker {
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
impl LoadTracker for RedisLoadTracker {
    async fn acquire_slot(
        &self,
        account_id: AccountId,
        max_concurrency: i32,
        request_id: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.conn.clone();
        let acquired: i64 = with_deadline("acquire_slot", self.timeout, async {
            Ok(scripts::ACQUIRE_SLOT
                .key(LoadKeys::concurrency(account_id))
                .arg(ttl_millis(ttl))
                .arg(max_concurrency)
                .arg(request_id)
                .invoke_async(&mut conn)
                .await?)
        })
        .await?;
        Ok(acquired == 1)
    }

    async fn release_slot(&self, account_id: AccountId, request_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        with_deadline("release_slot", self.timeout, async {
            redis::cmd("ZREM")
                .arg(LoadKeys::concurrency(account_id))
                .arg(request_id)
                .query_async::<()>(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn incr_waiting(&self, account_id: AccountId, ttl: Duration) -> Result<i64> {
        let mut conn = self.conn.clone();
        with_deadline("incr_waiting", self.timeout, async {
            Ok(scripts::INCR_WAITING
                .key(LoadKeys::waiting(account_id))
                .arg(ttl_millis(ttl))
                .invoke_async(&mut conn)
                .await?)
        })
        .await
    }

    async fn decr_waiting(&self, account_id: AccountId) -> Result<()> {
        let mut conn = self.conn.clone();
        with_deadline("decr_waiting", self.timeout, async {
            scripts::DECR_WAITING
                .key(LoadKeys::waiting(account_id))
                .invoke_async::<i64>(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn get_accounts_load_batch(
        &self,
        accounts: &[AccountWithConcurrency],
    ) -> Result<HashMap<AccountId, AccountLoadInfo>> {
        if accounts.is_empty() {
            return Ok(HashMap::new());
        }

        let mut invocation = scripts::LOAD_BATCH.prepare_invoke();
        for acc in accounts {
            invocation
                .key(LoadKeys::concurrency(acc.id))
                .key(LoadKeys::waiting(acc.id));
        }

        let mut conn = self.conn.clone();
        let values: Vec<i64> = with_deadline("get_accounts_load_batch", self.timeout, async {
            Ok(invocation.invoke_async(&mut conn).await?)
        })
        .await?;
        if values.len() != accounts.len() * 2 {
            return Err(SchedulerError::Internal(format!(
                "load batch returned {} values for {} accounts",
                values.len(),
                accounts.len()
            )));
        }

        Ok(accounts
            .iter()
            .zip(values.chunks_exact(2))
            .map(|(acc, pair)| {
                (
                    acc.id,
                    AccountLoadInfo {
                        account_id: acc.id,
                        current_concurrency: pair[0],
                        waiting_count: pair[1],
                    },
                )
            })
            .collect())
    }
}
