use std::future::Future;
use std::time::Duration;

use crate::error::{Result, SchedulerError};

/// Default bound applied to every shared-store round trip.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);

/// Runs `fut` under `timeout`, mapping an elapsed deadline to
/// [`SchedulerError::Timeout`] so callers handle it like any other store
/// failure.
pub async fn with_deadline<T, F>(
    op: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SchedulerError::Timeout { op, timeout }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapsed_deadline_maps_to_timeout() {
        let result: Result<()> = with_deadline(
            "slow_op",
            Duration::from_millis(50),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await;

        match result {
            Err(err @ SchedulerError::Timeout { op: "slow_op", .. }) => {
                assert!(err.is_transient())
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fast_operations_pass_through() {
        let value = with_deadline("fast", Duration::from_secs(1), async { Ok(7) })
            .await
            .expect("completes");
        assert_eq!(value, 7);
    }
}
