//! Shared store outages: routing keeps working off the system of record and
//! load reads report zero.

mod support;

use std::sync::Arc;

use chrono::Utc;
use switchyard_core::Availability;
use switchyard_core::cache::InMemorySchedulerCache;
use switchyard_core::load::{Admission, ConcurrencyService, InMemoryLoadTracker, LoadTracker};
use switchyard_core::scheduler::SchedulerSnapshotService;
use switchyard_model::{AccountWithConcurrency, FailureMode, SchedulerBucket, SchedulerMode};

use support::{FakeSource, PLATFORM, load_map_is_zero};

fn bucket() -> SchedulerBucket {
    SchedulerBucket::new(1, PLATFORM, SchedulerMode::Single)
}

fn source_with_three_accounts() -> FakeSource {
    let source = FakeSource::new();
    source.add_group(1, SchedulerMode::Single);
    for id in 1..=3 {
        source.upsert_account(id, 2, &[1]);
    }
    source
}

#[tokio::test]
async fn load_batch_reports_zero_when_the_store_is_down() {
    let availability = Availability::new();
    let tracker = InMemoryLoadTracker::with_availability(availability.clone());
    let service = ConcurrencyService::new(Arc::new(tracker.clone()));

    let ttl = std::time::Duration::from_secs(60);
    assert!(tracker.acquire_slot(1, 2, "req-1", ttl).await.unwrap());
    availability.set_available(false);

    let batch: Vec<AccountWithConcurrency> = (1..=3)
        .map(|id| AccountWithConcurrency {
            id,
            max_concurrency: 2,
        })
        .collect();
    let loads = service.get_accounts_load(&batch).await;

    assert_eq!(loads.len(), 3);
    assert!(load_map_is_zero(&loads));
}

#[tokio::test]
async fn scheduling_survives_a_full_store_outage() {
    let availability = Availability::new();
    let source = source_with_three_accounts();
    let concurrency = ConcurrencyService::new(Arc::new(InMemoryLoadTracker::with_availability(
        availability.clone(),
    )));
    let snapshots = SchedulerSnapshotService::new(
        Arc::new(InMemorySchedulerCache::with_availability(availability.clone())),
        Arc::new(source.clone()),
    )
    .with_concurrency(concurrency.clone());

    availability.set_available(false);

    let candidates = snapshots.select_candidates(&bucket(), Utc::now()).await.unwrap();
    assert_eq!(candidates.len(), 3);
    assert!(candidates.iter().all(|c| c.has_capacity));
    assert!(candidates.iter().all(|c| c.load.current_concurrency == 0));
    assert_eq!(source.account_reads(), 1);

    // Rebuilds fail without the cache, reads do not.
    assert!(snapshots.rebuild_bucket(&bucket()).await.is_err());
}

#[tokio::test]
async fn admission_follows_failure_mode() {
    let availability = Availability::new();
    let tracker: Arc<dyn LoadTracker> =
        Arc::new(InMemoryLoadTracker::with_availability(availability.clone()));
    let open = ConcurrencyService::new(tracker.clone());
    let closed = ConcurrencyService::new(tracker).with_failure_mode(FailureMode::Closed);

    assert_eq!(open.try_admit(1, 1, "a").await, Admission::Acquired);
    assert_eq!(open.try_admit(1, 1, "b").await, Admission::Full);

    availability.set_available(false);
    let untracked = open.try_admit(1, 1, "c").await;
    let refused = closed.try_admit(1, 1, "c").await;

    assert_eq!(untracked, Admission::Untracked);
    assert!(untracked.is_admitted());
    assert_eq!(refused, Admission::Refused);
    assert!(!refused.is_admitted());

    // Releasing during the outage is a no-op, not an error.
    open.release(1, "a").await;
}

#[tokio::test]
async fn concurrency_stats_degrade_to_zero_usage() {
    let availability = Availability::new();
    let source = source_with_three_accounts();
    let service = ConcurrencyService::new(Arc::new(InMemoryLoadTracker::with_availability(
        availability.clone(),
    )));
    let accounts: Vec<_> = (1..=3).filter_map(|id| source.account(id)).collect();

    availability.set_available(false);
    let stats = service.concurrency_stats(&accounts, None, None).await;

    let platform = &stats.platforms[PLATFORM];
    assert_eq!(platform.current_in_use, 0);
    assert_eq!(platform.max_capacity, 6);
    assert_eq!(platform.load_percentage, Some(0.0));
    assert_eq!(stats.accounts.len(), 3);
}
