use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use switchyard_model::{Account, AccountId, SchedulerBucket};
use tracing::{debug, info, warn};

use super::{
    AccountPatch, SUPERSEDED_GRACE, SchedulerCache, SchedulerKeys, SnapshotManifest,
    merge_last_used, overlay_patches,
};
use crate::counter::{CounterStore, RedisCounterStore, ttl_millis};
use crate::deadline::{DEFAULT_STORE_TIMEOUT, with_deadline};
use crate::error::{Result, SchedulerError};

mod scripts {
    use std::sync::LazyLock;

    use redis::Script;

    /// KEYS: active pointer, bucket set, new manifest.
    /// ARGV: new version, bucket string, manifest key prefix, grace ms.
    /// Returns 1 when the new version became active.
    pub static ACTIVATE_SNAPSHOT: LazyLock<Script> = LazyLock::new(|| {
        Script::new(
            r#"
            local current = tonumber(redis.call('GET', KEYS[1]) or '0')
            local incoming = tonumber(ARGV[1])
            if incoming <= current then
                redis.call('PEXPIRE', KEYS[3], ARGV[4])
                return 0
            end
            redis.call('SET', KEYS[1], ARGV[1])
            redis.call('SADD', KEYS[2], ARGV[2])
            if current > 0 then
                redis.call('PEXPIRE', ARGV[3] .. current, ARGV[4])
            end
            return 1
            "#,
        )
    });

    /// KEYS: write sequence, patch key, account key, last-used hash.
    /// ARGV: account JSON (empty for a delete), account id, patch retention ms.
    /// Stores the patch as `<seq>:<json>` and returns the sequence number.
    pub static PATCH_ACCOUNT: LazyLock<Script> = LazyLock::new(|| {
        Script::new(
            r#"
            local seq = redis.call('INCR', KEYS[1])
            redis.call('SET', KEYS[2], seq .. ':' .. ARGV[1], 'PX', ARGV[3])
            if ARGV[1] == '' then
                redis.call('DEL', KEYS[3])
                redis.call('HDEL', KEYS[4], ARGV[2])
            else
                redis.call('SET', KEYS[3], ARGV[1])
            end
            return seq
            "#,
        )
    });
}

/// Lifetime of a patch key. The periodic refresh republishes every bucket
/// well within it, after which the patch can no longer apply.
const PATCH_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Redis-backed [`SchedulerCache`].
#[derive(Clone)]
pub struct RedisSchedulerCache {
    conn: ConnectionManager,
    locks: RedisCounterStore,
    timeout: Duration,
    snapshot_max_age: Option<Duration>,
}

impl fmt::Debug for RedisSchedulerCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisSchedulerCache")
            .field("connection", &"ConnectionManager")
            .field("timeout", &self.timeout)
            .field("snapshot_max_age", &self.snapshot_max_age)
            .finish()
    }
}

impl RedisSchedulerCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            locks: RedisCounterStore::new(conn.clone()),
            conn,
            timeout: DEFAULT_STORE_TIMEOUT,
            snapshot_max_age: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.locks = self.locks.with_timeout(timeout);
        self
    }

    pub fn with_snapshot_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.snapshot_max_age = max_age;
        self
    }

    async fn discard_active(&self, bucket: &SchedulerBucket) -> Result<()> {
        let mut conn = self.conn.clone();
        with_deadline("discard_active", self.timeout, async {
            conn.del::<_, ()>(SchedulerKeys::active(bucket)).await?;
            Ok(())
        })
        .await
    }

    async fn patch_account(&self, id: AccountId, body: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let seq: u64 = with_deadline("patch_account", self.timeout, async {
            Ok(scripts::PATCH_ACCOUNT
                .key(SchedulerKeys::write_seq())
                .key(SchedulerKeys::account_patch(id))
                .key(SchedulerKeys::account(id))
                .key(SchedulerKeys::last_used())
                .arg(body)
                .arg(id)
                .arg(ttl_millis(PATCH_RETENTION))
                .invoke_async(&mut conn)
                .await?)
        })
        .await?;
        debug!(account_id = id, seq, deleted = body.is_empty(), "account patch stored");
        Ok(())
    }

    async fn load_patches(&self, ids: &[AccountId]) -> Result<HashMap<AccountId, AccountPatch>> {
        let keys: Vec<String> = ids.iter().map(|id| SchedulerKeys::account_patch(*id)).collect();
        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = with_deadline("load_patches", self.timeout, async {
            Ok(redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?)
        })
        .await?;

        let mut patches = HashMap::new();
        for (id, raw) in ids.iter().zip(raw) {
            let Some(raw) = raw else { continue };
            match decode_patch(&raw) {
                Some(patch) => {
                    patches.insert(*id, patch);
                }
                None => warn!(account_id = id, "ignoring undecodable account patch"),
            }
        }
        Ok(patches)
    }

    async fn load_last_used(
        &self,
        ids: &[AccountId],
    ) -> Result<Vec<Option<DateTime<Utc>>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<Option<i64>> = with_deadline("load_last_used", self.timeout, async {
            Ok(redis::cmd("HMGET")
                .arg(SchedulerKeys::last_used())
                .arg(ids)
                .query_async(&mut conn)
                .await?)
        })
        .await?;
        Ok(raw
            .into_iter()
            .map(|secs| secs.and_then(|s| DateTime::<Utc>::from_timestamp(s, 0)))
            .collect())
    }
}

/// Parses a `<seq>:<json>` patch value; an empty body is a delete.
fn decode_patch(raw: &str) -> Option<AccountPatch> {
    let (seq, body) = raw.split_once(':')?;
    let seq = seq.parse().ok()?;
    if body.is_empty() {
        return Some(AccountPatch { seq, account: None });
    }
    let account = serde_json::from_str(body).ok()?;
    Some(AccountPatch {
        seq,
        account: Some(account),
    })
}

fn decode_account(key: &str, raw: &str) -> Result<Account> {
    serde_json::from_str(raw).map_err(|e| SchedulerError::Corrupted {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl SchedulerCache for RedisSchedulerCache {
    async fn get_snapshot(&self, bucket: &SchedulerBucket) -> Result<Option<Vec<Account>>> {
        let mut conn = self.conn.clone();
        let active_key = SchedulerKeys::active(bucket);

        let active: Option<u64> = with_deadline("get_snapshot", self.timeout, async {
            Ok(conn.get(&active_key).await?)
        })
        .await?;
        let Some(version) = active else {
            debug!("Cache MISS: {}", active_key);
            return Ok(None);
        };

        let manifest_key = SchedulerKeys::manifest(bucket, version);
        let raw_manifest: Option<String> = with_deadline("get_snapshot", self.timeout, async {
            Ok(conn.get(&manifest_key).await?)
        })
        .await?;
        let Some(raw_manifest) = raw_manifest else {
            debug!(%bucket, version, "snapshot miss: manifest gone");
            return Ok(None);
        };

        let manifest: SnapshotManifest = match serde_json::from_str(&raw_manifest) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(%bucket, version, error = %e, "discarding corrupted snapshot manifest");
                self.discard_active(bucket).await?;
                return Ok(None);
            }
        };
        if manifest.is_stale_at(Utc::now(), self.snapshot_max_age) {
            debug!(%bucket, version, "snapshot miss: stale");
            return Ok(None);
        }
        if manifest.accounts.is_empty() {
            return Ok(Some(Vec::new()));
        }

        let ids: Vec<AccountId> = manifest.accounts.iter().map(|a| a.id).collect();
        let patches = self.load_patches(&ids).await?;
        let mut accounts = overlay_patches(&manifest, &patches);
        let ids: Vec<AccountId> = accounts.iter().map(|a| a.id).collect();
        let last_used = self.load_last_used(&ids).await?;
        for (account, seen) in accounts.iter_mut().zip(last_used) {
            merge_last_used(account, seen);
        }
        debug!("Cache HIT: {} ({} accounts)", active_key, accounts.len());
        Ok(Some(accounts))
    }

    async fn set_snapshot(&self, bucket: &SchedulerBucket, accounts: &[Account]) -> Result<()> {
        let mut conn = self.conn.clone();
        let (version, seq): (u64, u64) = with_deadline("set_snapshot", self.timeout, async {
            Ok(redis::pipe()
                .atomic()
                .incr(SchedulerKeys::bucket_seq(bucket), 1)
                .incr(SchedulerKeys::write_seq(), 1)
                .query_async(&mut conn)
                .await?)
        })
        .await?;

        let manifest = SnapshotManifest {
            version,
            seq,
            built_at_ms: Utc::now().timestamp_millis(),
            accounts: accounts.to_vec(),
        };
        let manifest_key = SchedulerKeys::manifest(bucket, version);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.set(&manifest_key, serde_json::to_string(&manifest)?)
            .ignore();
        for account in accounts {
            pipe.set(SchedulerKeys::account(account.id), serde_json::to_string(account)?)
                .ignore();
        }
        with_deadline("set_snapshot", self.timeout, async {
            pipe.query_async::<()>(&mut conn).await?;
            Ok(())
        })
        .await?;

        let activated: i64 = with_deadline("set_snapshot", self.timeout, async {
            Ok(scripts::ACTIVATE_SNAPSHOT
                .key(SchedulerKeys::active(bucket))
                .key(SchedulerKeys::buckets())
                .key(&manifest_key)
                .arg(version)
                .arg(bucket.to_string())
                .arg(SchedulerKeys::manifest_prefix(bucket))
                .arg(ttl_millis(SUPERSEDED_GRACE))
                .invoke_async(&mut conn)
                .await?)
        })
        .await?;

        if activated == 1 {
            info!(%bucket, version, accounts = accounts.len(), "snapshot activated");
        } else {
            debug!(%bucket, version, "snapshot superseded before activation");
        }
        Ok(())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        let mut conn = self.conn.clone();
        let key = SchedulerKeys::account(id);
        let body: Option<String> = with_deadline("get_account", self.timeout, async {
            Ok(conn.get(&key).await?)
        })
        .await?;
        let Some(body) = body else {
            debug!("Cache MISS: {}", key);
            return Ok(None);
        };
        let mut account = match decode_account(&key, &body) {
            Ok(account) => account,
            Err(e) => {
                warn!(account_id = id, error = %e, "discarding corrupted account entry");
                self.delete_account(id).await?;
                return Ok(None);
            }
        };
        let seen = self.load_last_used(&[id]).await?;
        merge_last_used(&mut account, seen.into_iter().next().flatten());
        Ok(Some(account))
    }

    async fn set_account(&self, account: &Account) -> Result<()> {
        let body = serde_json::to_string(account)?;
        self.patch_account(account.id, &body).await
    }

    async fn delete_account(&self, id: AccountId) -> Result<()> {
        self.patch_account(id, "").await
    }

    async fn update_last_used(&self, updates: &HashMap<AccountId, DateTime<Utc>>) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let fields: Vec<(AccountId, i64)> = updates
            .iter()
            .map(|(id, at)| (*id, at.timestamp()))
            .collect();
        let mut conn = self.conn.clone();
        with_deadline("update_last_used", self.timeout, async {
            conn.hset_multiple::<_, _, _, ()>(SchedulerKeys::last_used(), &fields)
                .await?;
            Ok(())
        })
        .await
    }

    async fn try_lock_bucket(
        &self,
        bucket: &SchedulerBucket,
        owner: &str,
        ttl: Duration,
    ) -> Result<bool> {
        self.locks
            .try_acquire(&SchedulerKeys::lock(bucket), owner, ttl)
            .await
    }

    async fn unlock_bucket(&self, bucket: &SchedulerBucket, owner: &str) -> Result<bool> {
        self.locks.release(&SchedulerKeys::lock(bucket), owner).await
    }

    async fn list_buckets(&self) -> Result<Vec<SchedulerBucket>> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = with_deadline("list_buckets", self.timeout, async {
            Ok(conn.smembers(SchedulerKeys::buckets()).await?)
        })
        .await?;

        let mut buckets: Vec<SchedulerBucket> = raw
            .iter()
            .filter_map(|entry| {
                let parsed = SchedulerBucket::parse(entry);
                if parsed.is_none() {
                    warn!(entry = %entry, "ignoring malformed bucket in bucket set");
                }
                parsed
            })
            .collect();
        buckets.sort();
        Ok(buckets)
    }

    async fn get_outbox_watermark(&self) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        with_deadline("get_outbox_watermark", self.timeout, async {
            Ok(conn.get(SchedulerKeys::outbox_watermark()).await?)
        })
        .await
    }

    async fn set_outbox_watermark(&self, id: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        with_deadline("set_outbox_watermark", self.timeout, async {
            conn.set::<_, _, ()>(SchedulerKeys::outbox_watermark(), id)
                .await?;
            Ok(())
        })
        .await
    }
}
