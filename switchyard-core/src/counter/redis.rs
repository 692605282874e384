use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::debug;

use super::{CounterStore, CounterTick, ttl_millis};
use crate::deadline::{DEFAULT_STORE_TIMEOUT, with_deadline};
use crate::error::{Result, SchedulerError};

/// Redis scripts for atomic counter operations
pub(crate) mod scripts {
    use std::sync::LazyLock;

    use redis::Script;

    /// INCR that sets the expiry on creation and repairs a missing one.
    /// Returns `{count, repaired}`.
    pub static INCR_WITH_TTL: LazyLock<Script> = LazyLock::new(|| {
        Script::new(
            r#"
            local current = redis.call('INCR', KEYS[1])
            local ttl = redis.call('PTTL', KEYS[1])
            local repaired = 0
            if current == 1 then
                redis.call('PEXPIRE', KEYS[1], ARGV[1])
            elseif ttl == -1 then
                redis.call('PEXPIRE', KEYS[1], ARGV[1])
                repaired = 1
            end
            return {current, repaired}
            "#,
        )
    });

    /// Compare-and-delete: only the current holder may release.
    pub static RELEASE_IF_OWNER: LazyLock<Script> = LazyLock::new(|| {
        Script::new(
            r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            end
            return 0
            "#,
        )
    });
}

/// Redis-backed [`CounterStore`].
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    timeout: Duration,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("connection", &"ConnectionManager")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RedisCounterStore {
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
impl CounterStore for RedisCounterStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<CounterTick> {
        let mut conn = self.conn.clone();
        let values: Vec<i64> = with_deadline("incr_with_ttl", self.timeout, async {
            Ok(scripts::INCR_WITH_TTL
                .key(key)
                .arg(ttl_millis(ttl))
                .invoke_async(&mut conn)
                .await?)
        })
        .await?;

        let [count, repaired] = values[..] else {
            return Err(SchedulerError::Internal(format!(
                "counter script returned {} values",
                values.len()
            )));
        };
        if repaired == 1 {
            debug!(key, "counter ttl repaired");
        }
        Ok(CounterTick {
            count,
            ttl_repaired: repaired == 1,
        })
    }

    async fn get_count(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        with_deadline("get_count", self.timeout, async {
            let value: Option<i64> = conn.get(key).await?;
            Ok(value.unwrap_or(0))
        })
        .await
    }

    async fn reset(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        with_deadline("reset", self.timeout, async {
            conn.del::<_, ()>(key).await?;
            Ok(())
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.conn.clone();
        with_deadline("ttl", self.timeout, async {
            let millis: i64 = conn.pttl(key).await?;
            // -2: missing key, -1: no expiry
            Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
        })
        .await
    }

    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        with_deadline("try_acquire", self.timeout, async {
            let reply: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(owner)
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async(&mut conn)
                .await?;
            Ok(reply.is_some())
        })
        .await
    }

    async fn release(&self, key: &str, owner: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        with_deadline("release", self.timeout, async {
            let deleted: i64 = scripts::RELEASE_IF_OWNER
                .key(key)
                .arg(owner)
                .invoke_async(&mut conn)
                .await?;
            Ok(deleted == 1)
        })
        .await
    }
}
