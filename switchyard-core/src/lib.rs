//! # Switchyard Core
//!
//! Account scheduling and admission control for an API gateway that routes
//! requests across many upstream provider accounts.
//!
//! ## Overview
//!
//! - **Snapshot cache**: versioned per-bucket account lists the router reads
//!   instead of querying the system of record on every request
//! - **Outbox consumer**: polls the outbox log past a watermark and rebuilds
//!   the buckets each mutation touches
//! - **Load tracking**: per-account in-flight slots and waiting counters, with
//!   platform/group/account aggregation
//! - **Temp-unschedulable state**: time-bounded bans written by error rules and
//!   the timeout counter
//! - **Rate limiting**: the shared atomic counter pattern applied per client
//!
//! Every shared-store capability is a trait with a Redis backend and an
//! in-process backend. Store failures never reach the request path; callers
//! fall back to the system of record or to the configured [`FailureMode`].
//!
//! ## Feature Flags
//!
//! - `redis`: Redis-backed stores
//! - `postgres`: PostgreSQL system-of-record adapter and [`MIGRATOR`]
//! - `postgres-tests`: sqlx-backed integration tests
//!
//! [`FailureMode`]: switchyard_model::FailureMode

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Scheduler snapshot cache and its backends
pub mod cache;

/// Atomic counter primitive
pub mod counter;

/// Deadline wrapper for shared-store calls
pub mod deadline;

/// Error types
pub mod error;

/// Live load tracking and concurrency aggregation
pub mod load;

/// Plumbing shared by the in-process backends
pub mod memory;

/// System-of-record ports
pub mod ports;

/// PostgreSQL adapter
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres;

#[cfg(feature = "postgres")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Per-client fixed-window rate limiting
pub mod rate_limit;

/// Snapshot service and outbox consumer
pub mod scheduler;

/// Temp-unschedulable state, error rules and the timeout counter
pub mod temp_unsched;

pub use error::{Result, SchedulerError};
pub use memory::Availability;
