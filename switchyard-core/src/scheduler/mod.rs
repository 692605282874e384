pub mod mapping;
pub mod outbox;
pub mod snapshot;

pub use mapping::EventAction;
pub use outbox::{CycleReport, OutboxConsumer, OutboxConsumerConfig, OutboxHealth};
pub use snapshot::{
    Candidate, DEFAULT_REBUILD_LOCK_TTL, RebuildOutcome, SchedulerSnapshotService,
};
