//! Shared plumbing for the in-process store backends.
//!
//! The in-memory backends stand in for Redis when no URL is configured and in
//! tests. They share an [`Availability`] switch so a whole "store" can be taken
//! down at once to exercise degraded paths.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Result, SchedulerError};

#[derive(Clone, Debug, Default)]
pub struct Availability {
    down: Arc<AtomicBool>,
}

impl Availability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.down.store(!available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self, op: &str) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(SchedulerError::Unavailable(format!(
                "in-memory store offline during {op}"
            )))
        }
    }
}

/// Expiry bookkeeping shared by the in-memory maps. Uses tokio's clock so
/// paused-time tests can advance past TTLs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Expiry(Option<Instant>);

impl Expiry {
    pub(crate) fn never() -> Self {
        Self(None)
    }

    pub(crate) fn after(ttl: Duration) -> Self {
        Self(Some(Instant::now() + ttl))
    }

    pub(crate) fn is_expired(&self) -> bool {
        matches!(self.0, Some(at) if at <= Instant::now())
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.is_some()
    }

    pub(crate) fn remaining(&self) -> Option<Duration> {
        self.0.map(|at| at.saturating_duration_since(Instant::now()))
    }
}
