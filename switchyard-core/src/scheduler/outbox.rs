//! Outbox consumer: turns outbox events into bucket rebuilds.
//!
//! Each cycle reads the watermark, fetches the next batch of events in ID
//! order, applies per-account changes directly, rebuilds every bucket the
//! batch touched once, and only then advances the watermark. Delivery is at
//! least once; rebuilds are idempotent so replaying a batch is harmless.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use switchyard_model::{AccountId, Group, GroupId, GroupStatus, SchedulerBucket};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::mapping::{EventAction, account_groups, buckets_for_groups, classify};
use super::snapshot::{RebuildOutcome, SchedulerSnapshotService};
use crate::error::Result;
use crate::ports::OutboxRepository;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxConsumerConfig {
    pub poll_interval: Duration,
    pub batch_size: i64,
    /// Rebuild every cached bucket this often; zero disables.
    pub full_refresh_interval: Duration,
}

impl Default for OutboxConsumerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 200,
            full_refresh_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Consumer progress, exposed for health checks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboxHealth {
    pub watermark: Option<i64>,
    pub max_id: Option<i64>,
    /// Events written but not yet processed.
    pub lag: Option<i64>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Summary of one polling cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub events: usize,
    pub rebuilt: usize,
    pub skipped: usize,
    pub watermark: Option<i64>,
    /// The watermark was missing and a full rebuild seeded it.
    pub bootstrapped: bool,
}

#[derive(Debug, Default)]
struct ConsumerState {
    last_cycle_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Work collected from one batch.
#[derive(Debug, Default)]
struct BatchPlan {
    rebuild_all: bool,
    groups: BTreeSet<GroupId>,
    last_used: HashMap<AccountId, DateTime<Utc>>,
}

#[derive(Clone)]
pub struct OutboxConsumer {
    snapshots: SchedulerSnapshotService,
    outbox: Arc<dyn OutboxRepository>,
    config: OutboxConsumerConfig,
    state: Arc<Mutex<ConsumerState>>,
}

impl std::fmt::Debug for OutboxConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxConsumer")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl OutboxConsumer {
    pub fn new(snapshots: SchedulerSnapshotService, outbox: Arc<dyn OutboxRepository>) -> Self {
        Self {
            snapshots,
            outbox,
            config: OutboxConsumerConfig::default(),
            state: Arc::default(),
        }
    }

    pub fn with_config(mut self, config: OutboxConsumerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OutboxConsumerConfig {
        &self.config
    }

    /// Runs one cycle and records its outcome for [`Self::health`].
    pub async fn poll_once(&self) -> Result<CycleReport> {
        let result = self.cycle().await;
        let mut state = self.state.lock();
        state.last_cycle_at = Some(Utc::now());
        state.last_error = result.as_ref().err().map(ToString::to_string);
        result
    }

    async fn cycle(&self) -> Result<CycleReport> {
        let cache = self.snapshots.cache();
        let Some(watermark) = cache.get_outbox_watermark().await? else {
            return self.bootstrap().await;
        };

        let events = self
            .outbox
            .list_after(watermark, self.config.batch_size)
            .await?;
        let Some(last_id) = events.last().map(|e| e.id) else {
            return Ok(CycleReport {
                watermark: Some(watermark),
                ..CycleReport::default()
            });
        };
        debug!(watermark, events = events.len(), "processing outbox batch");

        let mut plan = BatchPlan::default();
        for event in &events {
            match classify(event) {
                EventAction::Ignore => {
                    warn!(
                        target: "switchyard::outbox",
                        outbox_id = event.id,
                        event_type = %event.event_type,
                        "ignoring outbox event"
                    );
                }
                EventAction::ApplyLastUsed(updates) => {
                    for (id, at) in updates {
                        let entry = plan.last_used.entry(id).or_insert(at);
                        *entry = (*entry).max(at);
                    }
                }
                EventAction::RefreshAccount {
                    account_id,
                    group_ids,
                } => {
                    let account = self.snapshots.refresh_account(account_id).await?;
                    plan.groups.extend(account_groups(account.as_ref(), &group_ids));
                }
                EventAction::RebuildGroups(group_ids) => plan.groups.extend(group_ids),
                EventAction::RebuildAll => plan.rebuild_all = true,
            }
        }

        self.snapshots.touch_last_used(&plan.last_used).await;

        let buckets = if plan.rebuild_all {
            self.all_buckets().await?
        } else if plan.groups.is_empty() {
            BTreeSet::new()
        } else {
            self.buckets_for(&plan.groups).await?
        };
        let (rebuilt, skipped) = self.rebuild_each(&buckets).await?;

        cache.set_outbox_watermark(last_id).await?;
        info!(
            target: "switchyard::outbox",
            from = watermark,
            to = last_id,
            events = events.len(),
            rebuilt,
            skipped,
            "outbox watermark advanced"
        );
        Ok(CycleReport {
            events: events.len(),
            rebuilt,
            skipped,
            watermark: Some(last_id),
            bootstrapped: false,
        })
    }

    /// First start against an empty cache: rebuild everything, then continue
    /// from the highest event that existed before the rebuild began.
    async fn bootstrap(&self) -> Result<CycleReport> {
        let start_at = self.outbox.max_id().await?;
        info!(target: "switchyard::outbox", start_at, "no outbox watermark, running full rebuild");

        let buckets = self.all_buckets().await?;
        let (rebuilt, skipped) = self.rebuild_each(&buckets).await?;
        self.snapshots.cache().set_outbox_watermark(start_at).await?;

        Ok(CycleReport {
            events: 0,
            rebuilt,
            skipped,
            watermark: Some(start_at),
            bootstrapped: true,
        })
    }

    async fn known_groups(&self) -> Result<HashMap<GroupId, Group>> {
        Ok(self
            .snapshots
            .repository()
            .list_groups()
            .await?
            .into_iter()
            .map(|g| (g.id, g))
            .collect())
    }

    async fn cached_buckets(&self) -> Vec<SchedulerBucket> {
        match self.snapshots.cache().list_buckets().await {
            Ok(buckets) => buckets,
            Err(e) => {
                warn!(error = %e, "listing cached buckets failed");
                Vec::new()
            }
        }
    }

    async fn buckets_for(
        &self,
        group_ids: &BTreeSet<GroupId>,
    ) -> Result<BTreeSet<SchedulerBucket>> {
        let groups = self.known_groups().await?;
        let cached = self.cached_buckets().await;
        Ok(buckets_for_groups(group_ids, &groups, &cached))
    }

    /// Canonical buckets of active groups plus every bucket already cached.
    async fn all_buckets(&self) -> Result<BTreeSet<SchedulerBucket>> {
        let mut buckets: BTreeSet<SchedulerBucket> = self
            .known_groups()
            .await?
            .values()
            .filter(|g| g.status == GroupStatus::Active)
            .map(Group::bucket)
            .collect();
        buckets.extend(self.cached_buckets().await);
        Ok(buckets)
    }

    /// Stops at the first failed rebuild so the watermark stays put.
    async fn rebuild_each(&self, buckets: &BTreeSet<SchedulerBucket>) -> Result<(usize, usize)> {
        let (mut rebuilt, mut skipped) = (0, 0);
        for bucket in buckets {
            match self.snapshots.rebuild_bucket(bucket).await {
                Ok(RebuildOutcome::Rebuilt(_)) => rebuilt += 1,
                Ok(RebuildOutcome::Skipped) => skipped += 1,
                Err(e) => {
                    error!(
                        target: "switchyard::outbox",
                        %bucket,
                        error = %e,
                        "bucket rebuild failed"
                    );
                    return Err(e);
                }
            }
        }
        Ok((rebuilt, skipped))
    }

    /// Rebuilds every cached bucket, regardless of outbox activity. Covers
    /// rebuilds that were skipped on lock contention.
    pub async fn refresh_all(&self) -> Result<(usize, usize)> {
        let buckets: BTreeSet<SchedulerBucket> = self.cached_buckets().await.into_iter().collect();
        let (rebuilt, skipped) = self.rebuild_each(&buckets).await?;
        info!(target: "switchyard::outbox", rebuilt, skipped, "periodic bucket refresh");
        Ok((rebuilt, skipped))
    }

    /// Watermark, lag and the outcome of the most recent cycle.
    pub async fn health(&self) -> OutboxHealth {
        let watermark = match self.snapshots.cache().get_outbox_watermark().await {
            Ok(watermark) => watermark,
            Err(e) => {
                warn!(error = %e, "reading outbox watermark for health failed");
                None
            }
        };
        let max_id = match self.outbox.max_id().await {
            Ok(max_id) => Some(max_id),
            Err(e) => {
                warn!(error = %e, "reading outbox max id for health failed");
                None
            }
        };
        let lag = match (watermark, max_id) {
            (Some(watermark), Some(max_id)) => Some((max_id - watermark).max(0)),
            (None, Some(max_id)) => Some(max_id),
            _ => None,
        };

        let state = self.state.lock();
        OutboxHealth {
            watermark,
            max_id,
            lag,
            last_cycle_at: state.last_cycle_at,
            last_error: state.last_error.clone(),
        }
    }

    /// Polls until `shutdown` is cancelled. Sleeps between cycles when a
    /// cycle found nothing to do or failed.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            target: "switchyard::outbox",
            poll_interval = ?self.config.poll_interval,
            batch_size = self.config.batch_size,
            "outbox consumer started"
        );
        let mut last_refresh = Instant::now();

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let idle = match self.poll_once().await {
                Ok(report) => report.events == 0 && !report.bootstrapped,
                Err(e) => {
                    warn!(target: "switchyard::outbox", error = %e, "outbox cycle failed");
                    true
                }
            };

            let refresh_every = self.config.full_refresh_interval;
            if !refresh_every.is_zero() && last_refresh.elapsed() >= refresh_every {
                last_refresh = Instant::now();
                if let Err(e) = self.refresh_all().await {
                    warn!(target: "switchyard::outbox", error = %e, "periodic refresh failed");
                }
            }

            if idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }
        info!(target: "switchyard::outbox", "outbox consumer stopped");
    }
}
