//! Runs the Redis backends against a live server.
//!
//! Set `SWITCHYARD_TEST_REDIS_URL` (for example `redis://127.0.0.1:6379/15`)
//! to enable; without it every test returns immediately.
#![cfg(feature = "redis")]

mod support;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use switchyard_core::cache::{RedisSchedulerCache, SchedulerCache};
use switchyard_core::counter::{CounterStore, RedisCounterStore};
use switchyard_core::load::{LoadKeys, LoadTracker, RedisLoadTracker};
use switchyard_core::temp_unsched::{RedisTempUnschedCache, TempUnschedCache, TempUnschedKeys};
use switchyard_model::{AccountWithConcurrency, SchedulerBucket, SchedulerMode, TempUnschedState};
use uuid::Uuid;

use support::{FakeSource, PLATFORM, ids};

async fn connect() -> Option<ConnectionManager> {
    let url = std::env::var("SWITCHYARD_TEST_REDIS_URL").ok()?;
    let client = redis::Client::open(url).expect("valid redis url");
    Some(
        ConnectionManager::new(client)
            .await
            .expect("redis reachable"),
    )
}

/// IDs unlikely to collide with other runs sharing the database.
fn unique_id() -> i64 {
    (Uuid::new_v4().as_u128() as i64 & 0x0000_7fff_ffff_ffff) + 1
}

fn unique_key(prefix: &str) -> String {
    format!("test:{prefix}:{}", Uuid::new_v4())
}

#[tokio::test]
async fn counter_sets_ttl_once_and_repairs_it() {
    let Some(conn) = connect().await else { return };
    let store = RedisCounterStore::new(conn.clone());
    let key = unique_key("counter");
    let ttl = Duration::from_secs(60);

    assert_eq!(store.incr_with_ttl(&key, ttl).await.unwrap().count, 1);
    assert_eq!(store.incr_with_ttl(&key, ttl).await.unwrap().count, 2);
    assert!(store.ttl(&key).await.unwrap().is_some());

    let mut raw = conn;
    let _: () = redis::cmd("PERSIST").arg(&key).query_async(&mut raw).await.unwrap();
    assert_eq!(store.ttl(&key).await.unwrap(), None);

    let tick = store.incr_with_ttl(&key, ttl).await.unwrap();
    assert_eq!(tick.count, 3);
    assert!(tick.ttl_repaired);
    assert!(store.ttl(&key).await.unwrap().is_some());

    store.reset(&key).await.unwrap();
    assert_eq!(store.get_count(&key).await.unwrap(), 0);
}

#[tokio::test]
async fn lock_has_a_single_owner() {
    let Some(conn) = connect().await else { return };
    let store = RedisCounterStore::new(conn);
    let key = unique_key("lock");
    let ttl = Duration::from_secs(30);

    assert!(store.try_acquire(&key, "a", ttl).await.unwrap());
    assert!(!store.try_acquire(&key, "b", ttl).await.unwrap());
    assert!(!store.release(&key, "b").await.unwrap());
    assert!(store.release(&key, "a").await.unwrap());
    assert!(store.try_acquire(&key, "b", ttl).await.unwrap());
    store.release(&key, "b").await.unwrap();
}

#[tokio::test]
async fn snapshot_versions_and_last_used() {
    let Some(conn) = connect().await else { return };
    let cache = RedisSchedulerCache::new(conn);
    let group = unique_id();
    let bucket = SchedulerBucket::new(group, PLATFORM, SchedulerMode::Single);

    let source = FakeSource::new();
    source.add_group(group, SchedulerMode::Single);
    let (a, b) = (unique_id(), unique_id());
    let first = vec![source.upsert_account(a, 3, &[group])];
    let second = vec![
        source.upsert_account(a, 3, &[group]),
        source.upsert_account(b, 3, &[group]),
    ];

    assert!(cache.get_snapshot(&bucket).await.unwrap().is_none());
    cache.set_snapshot(&bucket, &first).await.unwrap();
    cache.set_snapshot(&bucket, &second).await.unwrap();
    let snapshot = cache.get_snapshot(&bucket).await.unwrap().unwrap();
    assert_eq!(ids(&snapshot), vec![a, b]);
    assert!(cache.list_buckets().await.unwrap().contains(&bucket));

    let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
    cache.update_last_used(&HashMap::from([(b, at)])).await.unwrap();
    let snapshot = cache.get_snapshot(&bucket).await.unwrap().unwrap();
    assert_eq!(snapshot[1].last_used_at, Some(at));

    // A delete after the version was built drops the account from it.
    cache.delete_account(a).await.unwrap();
    let snapshot = cache.get_snapshot(&bucket).await.unwrap().unwrap();
    assert_eq!(ids(&snapshot), vec![b]);
    assert!(cache.get_account(a).await.unwrap().is_none());
    cache.delete_account(b).await.unwrap();
}

#[tokio::test]
async fn versions_keep_their_own_account_bodies() {
    let Some(conn) = connect().await else { return };
    let cache = RedisSchedulerCache::new(conn);
    let (g1, g2) = (unique_id(), unique_id());
    let first = SchedulerBucket::new(g1, PLATFORM, SchedulerMode::Single);
    let second = SchedulerBucket::new(g2, PLATFORM, SchedulerMode::Single);

    let source = FakeSource::new();
    source.add_group(g1, SchedulerMode::Single);
    source.add_group(g2, SchedulerMode::Single);
    let account = unique_id();
    let narrow = source.upsert_account(account, 5, &[g1, g2]);
    let wide = source.upsert_account(account, 10, &[g1, g2]);

    cache.set_snapshot(&first, &[narrow]).await.unwrap();
    cache.set_snapshot(&second, &[wide.clone()]).await.unwrap();
    let snapshot = cache.get_snapshot(&first).await.unwrap().unwrap();
    assert_eq!(snapshot[0].concurrency, 5);

    let mut patched = wide;
    patched.concurrency = 7;
    cache.set_account(&patched).await.unwrap();
    for bucket in [&first, &second] {
        let snapshot = cache.get_snapshot(bucket).await.unwrap().unwrap();
        assert_eq!(snapshot[0].concurrency, 7);
    }
    cache.delete_account(account).await.unwrap();
}

#[tokio::test]
async fn load_slots_and_waiting_counters() {
    let Some(conn) = connect().await else { return };
    let tracker = RedisLoadTracker::new(conn);
    let account = unique_id();
    let ttl = Duration::from_secs(60);

    assert!(tracker.acquire_slot(account, 2, "r1", ttl).await.unwrap());
    assert!(tracker.acquire_slot(account, 2, "r2", ttl).await.unwrap());
    assert!(!tracker.acquire_slot(account, 2, "r3", ttl).await.unwrap());
    assert_eq!(tracker.incr_waiting(account, ttl).await.unwrap(), 1);

    let loads = tracker
        .get_accounts_load_batch(&[AccountWithConcurrency {
            id: account,
            max_concurrency: 2,
        }])
        .await
        .unwrap();
    assert_eq!(loads[&account].current_concurrency, 2);
    assert_eq!(loads[&account].waiting_count, 1);

    tracker.release_slot(account, "r1").await.unwrap();
    tracker.release_slot(account, "r2").await.unwrap();
    tracker.decr_waiting(account).await.unwrap();
    tracker.decr_waiting(account).await.unwrap();

    let loads = tracker
        .get_accounts_load_batch(&[AccountWithConcurrency {
            id: account,
            max_concurrency: 2,
        }])
        .await
        .unwrap();
    assert_eq!(loads[&account].current_concurrency, 0);
    assert_eq!(loads[&account].waiting_count, 0);
}

#[tokio::test]
async fn slot_expiry_follows_the_server_clock() {
    let Some(conn) = connect().await else { return };
    let tracker = RedisLoadTracker::new(conn.clone());
    let account = unique_id();

    assert!(tracker.acquire_slot(account, 1, "r1", Duration::from_secs(60)).await.unwrap());

    let mut raw = conn;
    let (secs, micros): (i64, i64) = redis::cmd("TIME").query_async(&mut raw).await.unwrap();
    let server_now = secs * 1000 + micros / 1000;
    let score: f64 = redis::cmd("ZSCORE")
        .arg(LoadKeys::concurrency(account))
        .arg("r1")
        .query_async(&mut raw)
        .await
        .unwrap();
    let expires_in = score as i64 - server_now;
    assert!((55_000..=60_000).contains(&expires_in), "slot expires in {expires_in}ms");

    tracker.release_slot(account, "r1").await.unwrap();

    let short_lived = unique_id();
    let ttl = Duration::from_millis(200);
    assert!(tracker.acquire_slot(short_lived, 1, "r2", ttl).await.unwrap());
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(tracker.acquire_slot(short_lived, 1, "r3", ttl).await.unwrap());
}

#[tokio::test]
async fn temp_unsched_state_round_trips() {
    let Some(conn) = connect().await else { return };
    let store = RedisTempUnschedCache::new(conn);
    let account = unique_id();
    let now = Utc::now().timestamp();
    let state = TempUnschedState {
        until_unix: now + 600,
        triggered_at_unix: now,
        status_code: 529,
        matched_keyword: "overloaded".into(),
        rule_index: 0,
        error_message: "upstream overloaded".into(),
    };

    store.set_temp_unsched(account, &state).await.unwrap();
    assert_eq!(store.get_temp_unsched(account).await.unwrap(), Some(state));
    store.delete_temp_unsched(account).await.unwrap();
    assert_eq!(store.get_temp_unsched(account).await.unwrap(), None);
}

#[tokio::test]
async fn temp_unsched_states_are_fetched_together() {
    let Some(conn) = connect().await else { return };
    let store = RedisTempUnschedCache::new(conn.clone());
    let (banned, missing, corrupted) = (unique_id(), unique_id(), unique_id());
    let now = Utc::now().timestamp();
    let state = TempUnschedState {
        until_unix: now + 600,
        triggered_at_unix: now,
        status_code: 504,
        matched_keyword: "timeout".into(),
        rule_index: -1,
        error_message: "upstream timed out".into(),
    };
    store.set_temp_unsched(banned, &state).await.unwrap();
    let mut raw = conn;
    let _: () = redis::cmd("SET")
        .arg(TempUnschedKeys::state(corrupted))
        .arg("{not json")
        .query_async(&mut raw)
        .await
        .unwrap();

    let states = store
        .get_temp_unsched_many(&[banned, missing, corrupted])
        .await
        .unwrap();

    assert_eq!(states, HashMap::from([(banned, state)]));
    assert!(store.get_temp_unsched_many(&[]).await.unwrap().is_empty());
    store.delete_temp_unsched(banned).await.unwrap();
    store.delete_temp_unsched(corrupted).await.unwrap();
}
