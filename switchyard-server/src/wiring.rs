//! Builds the scheduler services from configuration.

use std::sync::Arc;

use anyhow::Context;
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use switchyard_config::Config;
use switchyard_core::cache::{InMemorySchedulerCache, RedisSchedulerCache, SchedulerCache};
use switchyard_core::counter::{CounterStore, InMemoryCounterStore, RedisCounterStore};
use switchyard_core::load::{ConcurrencyService, InMemoryLoadTracker, LoadTracker, RedisLoadTracker};
use switchyard_core::postgres::PostgresSchedulerStore;
use switchyard_core::rate_limit::RateLimiter;
use switchyard_core::scheduler::{OutboxConsumer, OutboxConsumerConfig, SchedulerSnapshotService};
use switchyard_core::temp_unsched::{
    InMemoryTempUnschedCache, RedisTempUnschedCache, TempUnschedCache, TempUnschedPolicy,
    TempUnschedRule, TempUnschedService, TimeoutCounter,
};
use tracing::info;

/// Shared-store backends, either all Redis or all in-process.
pub struct Stores {
    pub cache: Arc<dyn SchedulerCache>,
    pub counters: Arc<dyn CounterStore>,
    pub load: Arc<dyn LoadTracker>,
    pub temp_unsched: Arc<dyn TempUnschedCache>,
    pub kind: &'static str,
}

impl std::fmt::Debug for Stores {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").field("kind", &self.kind).finish_non_exhaustive()
    }
}

impl Stores {
    pub fn redis(conn: ConnectionManager, config: &Config) -> Self {
        let timeout = config.scheduler.store_timeout;
        Self {
            cache: Arc::new(
                RedisSchedulerCache::new(conn.clone())
                    .with_timeout(timeout)
                    .with_snapshot_max_age(config.scheduler.snapshot_max_age),
            ),
            counters: Arc::new(RedisCounterStore::new(conn.clone()).with_timeout(timeout)),
            load: Arc::new(RedisLoadTracker::new(conn.clone()).with_timeout(timeout)),
            temp_unsched: Arc::new(RedisTempUnschedCache::new(conn).with_timeout(timeout)),
            kind: "redis",
        }
    }

    pub fn in_memory(config: &Config) -> Self {
        Self {
            cache: Arc::new(
                InMemorySchedulerCache::new()
                    .with_snapshot_max_age(config.scheduler.snapshot_max_age),
            ),
            counters: Arc::new(InMemoryCounterStore::new()),
            load: Arc::new(InMemoryLoadTracker::new()),
            temp_unsched: Arc::new(InMemoryTempUnschedCache::new()),
            kind: "memory",
        }
    }
}

/// Everything the running process holds on to.
#[derive(Clone, Debug)]
pub struct Services {
    pub snapshots: SchedulerSnapshotService,
    pub consumer: OutboxConsumer,
    pub concurrency: ConcurrencyService,
    pub temp_unsched: TempUnschedService,
    pub rate_limiter: RateLimiter,
    pub store_kind: &'static str,
}

pub async fn connect_postgres(config: &Config) -> anyhow::Result<PgPool> {
    let url = config
        .database
        .url
        .as_deref()
        .context("DATABASE_URL is not configured")?;
    PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(url)
        .await
        .context("failed to connect to PostgreSQL")
}

pub async fn connect_stores(config: &Config) -> anyhow::Result<Stores> {
    let Some(redis) = &config.redis else {
        return Ok(Stores::in_memory(config));
    };
    let client = redis::Client::open(redis.url.as_str()).context("invalid Redis URL")?;
    let conn = ConnectionManager::new(client)
        .await
        .context("failed to connect to Redis")?;
    info!("connected to Redis");
    Ok(Stores::redis(conn, config))
}

pub fn temp_unsched_policy(config: &Config) -> TempUnschedPolicy {
    let tu = &config.temp_unsched;
    TempUnschedPolicy {
        rules: tu
            .rules
            .iter()
            .map(|rule| TempUnschedRule {
                error_code: rule.error_code,
                keywords: rule.keywords.clone(),
                duration_minutes: rule.duration_minutes,
                description: rule.description.clone(),
            })
            .collect(),
        timeout_threshold: tu.timeout_threshold,
        timeout_window_minutes: tu.timeout_window_minutes,
        timeout_ban_minutes: tu.timeout_ban_minutes,
    }
}

pub fn build_services(config: &Config, stores: Stores, pool: PgPool) -> Services {
    let store = Arc::new(PostgresSchedulerStore::new(pool));
    let sched = &config.scheduler;

    let concurrency = ConcurrencyService::new(stores.load)
        .with_failure_mode(sched.failure_mode)
        .with_chunk_size(sched.load_batch_chunk)
        .with_slot_ttl(sched.slot_ttl);

    let temp_unsched = TempUnschedService::new(
        stores.temp_unsched,
        TimeoutCounter::new(stores.counters.clone()),
    )
    .with_scheduler_cache(stores.cache.clone())
    .with_policy(temp_unsched_policy(config))
    .with_failure_mode(sched.failure_mode);

    let snapshots = SchedulerSnapshotService::new(stores.cache, store.clone())
        .with_temp_unsched(temp_unsched.clone())
        .with_concurrency(concurrency.clone())
        .with_lock_ttl(sched.rebuild_lock_ttl);

    let consumer = OutboxConsumer::new(snapshots.clone(), store).with_config(OutboxConsumerConfig {
        poll_interval: sched.outbox_poll_interval,
        batch_size: sched.outbox_batch_size,
        full_refresh_interval: sched.full_refresh_interval,
    });

    let rate_limiter = RateLimiter::new(stores.counters)
        .with_prefix(config.rate_limit.key_prefix.clone())
        .with_failure_mode(config.rate_limit.failure_mode);

    Services {
        snapshots,
        consumer,
        concurrency,
        temp_unsched,
        rate_limiter,
        store_kind: stores.kind,
    }
}
