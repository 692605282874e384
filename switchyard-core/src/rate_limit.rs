//! Fixed-window per-client rate limiting over the shared counter store.
//!
//! Each `(scope, client)` pair gets one counter whose window starts at the
//! first request. The limiter only answers allow/deny; attaching it to an HTTP
//! stack is left to the caller.

use std::sync::Arc;
use std::time::Duration;

use switchyard_model::FailureMode;
use tracing::{info, warn};

use crate::counter::{CounterStore, ttl_millis};

pub const DEFAULT_KEY_PREFIX: &str = "rate_limit:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Requests seen in the current window; `0` when the store was unreachable.
    pub count: i64,
    pub ttl_repaired: bool,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    prefix: String,
    failure_mode: FailureMode,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("prefix", &self.prefix)
            .field("failure_mode", &self.failure_mode)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            failure_mode: FailureMode::default(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    pub fn key(&self, scope: &str, client: &str) -> String {
        format!("{}{scope}:{client}", self.prefix)
    }

    /// Counts one request from `client` and decides whether it fits within
    /// `limit` requests per `window`.
    pub async fn check(
        &self,
        scope: &str,
        client: &str,
        limit: u64,
        window: Duration,
    ) -> RateLimitDecision {
        let key = self.key(scope, client);
        // Windows below one millisecond are clamped by the store call.
        match self.store.incr_with_ttl(&key, window).await {
            Ok(tick) => {
                if tick.ttl_repaired {
                    info!(key = %key, window_ms = ttl_millis(window), "rate limit ttl repaired");
                }
                RateLimitDecision {
                    allowed: tick.count <= i64::try_from(limit).unwrap_or(i64::MAX),
                    count: tick.count,
                    ttl_repaired: tick.ttl_repaired,
                }
            }
            Err(e) => {
                warn!(
                    key = %key,
                    mode = self.failure_mode.label(),
                    error = %e,
                    "rate limit store error"
                );
                RateLimitDecision {
                    allowed: self.failure_mode.degraded_allow(),
                    count: 0,
                    ttl_repaired: false,
                }
            }
        }
    }
}
