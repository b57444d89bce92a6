//! Polling of long-running remote operations.

use std::future::Future;
use std::time::Duration;

use crate::errors::{CloudError, Result};

/// Fixed delay between status checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Yandex move/copy/delete: about one minute.
pub const YANDEX_MAX_POLLS: u32 = 30;

/// Dropbox save-from-url: about five minutes.
pub const DROPBOX_MAX_POLLS: u32 = 150;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    InProgress,
    Success,
    Failed(String),
}

/// Sleep `interval`, then call `check`, until it reports a final state or
/// `max_polls` checks have been made. Adapters pass [`POLL_INTERVAL`].
///
/// A remote failure surfaces as [`CloudError::OperationFailed`]; running out
/// of checks as [`CloudError::OperationTimeout`]. Errors from `check` itself
/// propagate unchanged.
pub async fn wait_for<F, Fut>(interval: Duration, max_polls: u32, mut check: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<OperationStatus>>,
{
    for attempt in 1..=max_polls {
        tokio::time::sleep(interval).await;
        match check().await? {
            OperationStatus::Success => {
                tracing::debug!(attempt, "Remote operation finished");
                return Ok(());
            }
            OperationStatus::Failed(message) => return Err(CloudError::OperationFailed(message)),
            OperationStatus::InProgress => {
                tracing::debug!(attempt, max_polls, "Remote operation still in progress");
            }
        }
    }
    Err(CloudError::OperationTimeout { polls: max_polls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_success_after_pending_checks() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let started = tokio::time::Instant::now();

        wait_for(POLL_INTERVAL, 10, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(if n < 3 {
                OperationStatus::InProgress
            } else {
                OperationStatus::Success
            })
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), POLL_INTERVAL * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_distinct_from_timeout() {
        let err = wait_for(POLL_INTERVAL, 5, || async { Ok(OperationStatus::Failed("boom".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::OperationFailed(ref m) if m == "boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_polls() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = wait_for(POLL_INTERVAL, YANDEX_MAX_POLLS, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(OperationStatus::InProgress)
        })
        .await
        .unwrap_err();

        assert!(matches!(err, CloudError::OperationTimeout { polls: 30 }));
        assert_eq!(calls.load(Ordering::SeqCst), YANDEX_MAX_POLLS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_errors_propagate() {
        let err = wait_for(POLL_INTERVAL, 3, || async {
            Err(CloudError::Api {
                status: 500,
                message: "down".into(),
            })
        })
        .await
        .unwrap_err();
        assert_eq!(err.status(), Some(500));
    }
}
