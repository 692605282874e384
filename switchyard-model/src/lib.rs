//! Core data model definitions shared across Switchyard crates.
#![allow(missing_docs)]

pub use ::chrono;

pub mod account;
pub mod bucket;
pub mod error;
pub mod failure;
pub mod group;
pub mod load;
pub mod outbox;
pub mod temp_unsched;

// Intentionally curated re-exports for downstream consumers.
pub use account::{Account, AccountGroup, AccountId, AccountStatus};
pub use bucket::{SchedulerBucket, SchedulerMode};
pub use error::{ModelError, Result as ModelResult};
pub use failure::FailureMode;
pub use group::{Group, GroupId, GroupStatus};
pub use load::{
    AccountConcurrencyInfo, AccountLoadInfo, AccountWithConcurrency,
    ConcurrencyStats, GroupConcurrencyInfo, PlatformConcurrencyInfo,
};
pub use outbox::{NewOutboxEvent, OutboxEvent, OutboxEventType};
pub use temp_unsched::TempUnschedState;
