mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use switchyard_core::Availability;
use switchyard_core::cache::{InMemorySchedulerCache, SchedulerCache};
use switchyard_core::scheduler::{RebuildOutcome, SchedulerSnapshotService};
use switchyard_model::{Account, SchedulerBucket, SchedulerMode};

use support::{FakeSource, PLATFORM, ids};

fn bucket() -> SchedulerBucket {
    SchedulerBucket::new(1, PLATFORM, SchedulerMode::Single)
}

fn accounts(range: std::ops::RangeInclusive<i64>) -> Vec<Account> {
    let source = FakeSource::new();
    source.add_group(1, SchedulerMode::Single);
    range.map(|id| source.upsert_account(id, 5, &[1])).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_observe_a_partial_snapshot() {
    let cache = Arc::new(InMemorySchedulerCache::new());
    let first = accounts(1..=50);
    let second = accounts(101..=150);
    cache.set_snapshot(&bucket(), &first).await.unwrap();

    let writer = {
        let cache = cache.clone();
        let (first, second) = (first.clone(), second.clone());
        tokio::spawn(async move {
            for i in 0..200 {
                let next = if i % 2 == 0 { &second } else { &first };
                cache.set_snapshot(&bucket(), next).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let expected_first = ids(&first);
    let expected_second = ids(&second);
    let mut readers = Vec::new();
    for _ in 0..4 {
        let cache = cache.clone();
        let (a, b) = (expected_first.clone(), expected_second.clone());
        readers.push(tokio::spawn(async move {
            for _ in 0..500 {
                let seen = cache
                    .get_snapshot(&bucket())
                    .await
                    .unwrap()
                    .expect("a version is always active");
                let seen = ids(&seen);
                assert!(seen == a || seen == b, "observed a mixed snapshot: {seen:?}");
                tokio::task::yield_now().await;
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_mix_bodies_from_different_versions() {
    let source = FakeSource::new();
    source.add_group(1, SchedulerMode::Single);
    let wide = vec![source.upsert_account(1, 5, &[1]), source.upsert_account(2, 5, &[1])];
    let narrow = vec![source.upsert_account(1, 10, &[1])];

    let cache = Arc::new(InMemorySchedulerCache::new());
    cache.set_snapshot(&bucket(), &wide).await.unwrap();

    let shape = |accounts: &[Account]| -> Vec<(i64, i32)> {
        accounts.iter().map(|a| (a.id, a.concurrency)).collect()
    };
    let expected = [shape(&wide), shape(&narrow)];

    let writer = {
        let cache = cache.clone();
        tokio::spawn(async move {
            for i in 0..500 {
                let next = if i % 2 == 0 { &narrow } else { &wide };
                cache.set_snapshot(&bucket(), next).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..4 {
        let cache = cache.clone();
        let expected = expected.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..1000 {
                let seen = cache
                    .get_snapshot(&bucket())
                    .await
                    .unwrap()
                    .expect("a version is always active");
                let seen = shape(&seen);
                assert!(expected.contains(&seen), "observed a mixed snapshot: {seen:?}");
                tokio::task::yield_now().await;
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
}

#[tokio::test]
async fn older_versions_never_replace_newer_ones() {
    let cache = InMemorySchedulerCache::new();
    cache.set_snapshot(&bucket(), &accounts(1..=2)).await.unwrap();
    cache.set_snapshot(&bucket(), &accounts(3..=4)).await.unwrap();

    assert_eq!(cache.active_version(&bucket()), Some(2));
    let snapshot = cache.get_snapshot(&bucket()).await.unwrap().unwrap();
    assert_eq!(ids(&snapshot), vec![3, 4]);
}

#[tokio::test]
async fn concurrent_lock_attempts_have_one_winner() {
    let cache = InMemorySchedulerCache::new();
    let ttl = Duration::from_secs(30);

    let (bucket_a, bucket_b) = (bucket(), bucket());
    let (a, b) = tokio::join!(
        cache.try_lock_bucket(&bucket_a, "replica-a", ttl),
        cache.try_lock_bucket(&bucket_b, "replica-b", ttl),
    );
    let winners = [a.unwrap(), b.unwrap()].into_iter().filter(|won| *won).count();
    assert_eq!(winners, 1);

    // Other buckets are independent.
    let other = SchedulerBucket::new(2, PLATFORM, SchedulerMode::Single);
    assert!(cache.try_lock_bucket(&other, "replica-b", ttl).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn abandoned_lock_expires_after_ttl() {
    let cache = InMemorySchedulerCache::new();
    let ttl = Duration::from_secs(30);

    assert!(cache.try_lock_bucket(&bucket(), "crashed", ttl).await.unwrap());
    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(!cache.try_lock_bucket(&bucket(), "next", ttl).await.unwrap());

    tokio::time::advance(Duration::from_secs(2)).await;
    assert!(cache.try_lock_bucket(&bucket(), "next", ttl).await.unwrap());
    // The expired holder can no longer release the new holder's lock.
    assert!(!cache.unlock_bucket(&bucket(), "crashed").await.unwrap());
}

#[tokio::test]
async fn repeated_rebuilds_publish_identical_contents() {
    let source = FakeSource::new();
    source.add_group(1, SchedulerMode::Single);
    for id in [3, 1, 2] {
        source.upsert_account(id, 5, &[1]);
    }
    let cache = Arc::new(InMemorySchedulerCache::new());
    let service = SchedulerSnapshotService::new(cache.clone(), Arc::new(source.clone()));

    assert_eq!(service.rebuild_bucket(&bucket()).await.unwrap(), RebuildOutcome::Rebuilt(3));
    let first = cache.get_snapshot(&bucket()).await.unwrap().unwrap();
    assert_eq!(service.rebuild_bucket(&bucket()).await.unwrap(), RebuildOutcome::Rebuilt(3));
    let second = cache.get_snapshot(&bucket()).await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(ids(&first), vec![1, 2, 3]);
    assert_eq!(cache.active_version(&bucket()), Some(2));
}

#[tokio::test]
async fn rebuild_is_skipped_while_another_holder_has_the_lock() {
    let source = FakeSource::new();
    source.add_group(1, SchedulerMode::Single);
    source.upsert_account(1, 5, &[1]);
    let cache = Arc::new(InMemorySchedulerCache::new());
    let service = SchedulerSnapshotService::new(cache.clone(), Arc::new(source.clone()));

    cache
        .try_lock_bucket(&bucket(), "other-replica", Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(service.rebuild_bucket(&bucket()).await.unwrap(), RebuildOutcome::Skipped);
    assert_eq!(source.account_reads(), 0);
}

#[tokio::test]
async fn cache_outage_falls_back_to_system_of_record() {
    let source = FakeSource::new();
    source.add_group(1, SchedulerMode::Single);
    source.upsert_account(1, 5, &[1]);
    source.upsert_account(2, 5, &[1]);

    let availability = Availability::new();
    let cache = Arc::new(InMemorySchedulerCache::with_availability(availability.clone()));
    let service = SchedulerSnapshotService::new(cache.clone(), Arc::new(source.clone()));
    service.rebuild_bucket(&bucket()).await.unwrap();
    let reads_after_rebuild = source.account_reads();

    let cached = service.list_schedulable_accounts(&bucket(), Utc::now()).await.unwrap();
    assert_eq!(ids(&cached), vec![1, 2]);
    assert_eq!(source.account_reads(), reads_after_rebuild);

    availability.set_available(false);
    let fallback = service.list_schedulable_accounts(&bucket(), Utc::now()).await.unwrap();
    assert_eq!(ids(&fallback), vec![1, 2]);
    assert_eq!(source.account_reads(), reads_after_rebuild + 1);
}

#[tokio::test]
async fn runtime_flags_are_evaluated_on_read() {
    let source = FakeSource::new();
    source.add_group(1, SchedulerMode::Single);
    source.upsert_account(1, 5, &[1]);
    source.upsert_account(2, 5, &[1]);
    source.modify_account(2, |a| {
        a.rate_limit_reset_at = Some(Utc::now() + chrono::Duration::minutes(5));
    });

    let cache = Arc::new(InMemorySchedulerCache::new());
    let service = SchedulerSnapshotService::new(cache, Arc::new(source));
    service.rebuild_bucket(&bucket()).await.unwrap();

    let now = Utc::now();
    assert_eq!(ids(&service.list_schedulable_accounts(&bucket(), now).await.unwrap()), vec![1]);

    let later = now + chrono::Duration::minutes(10);
    assert_eq!(
        ids(&service.list_schedulable_accounts(&bucket(), later).await.unwrap()),
        vec![1, 2]
    );
}
