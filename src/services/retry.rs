//! Bounded retry with exponential backoff around external calls.
//!
//! Every call gets a per-attempt timeout. Only transient failures
//! (see [`AppError::is_transient`]) are retried.

use crate::error::AppError;
use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry settings for tracker and content-source calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f32,
    /// Add a random delay of up to the current backoff.
    pub jitter: bool,
    /// Per-attempt timeout.
    pub call_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter: true,
            call_timeout_secs: 30,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
            .with_factor(self.backoff_multiplier)
            .with_max_times(self.max_attempts.max(1) as usize - 1);

        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// A server-provided `Retry-After` replaces the computed backoff but is
    /// still capped. `None` means the budget is spent.
    fn adjust_delay(&self, err: &AppError, planned: Option<Duration>) -> Option<Duration> {
        let planned = planned?;
        match err.retry_after_secs() {
            Some(secs) => Some(Duration::from_millis(
                secs.saturating_mul(1000).min(self.max_backoff_ms),
            )),
            None => Some(planned),
        }
    }
}

/// Run `operation` until it succeeds, fails permanently, or the attempt
/// budget runs out. The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let call_timeout = Duration::from_secs(policy.call_timeout_secs.max(1));

    let attempt = || {
        let call = operation();
        async move {
            match tokio::time::timeout(call_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(AppError::timeout(operation_name, policy.call_timeout_secs)),
            }
        }
    };

    let result = attempt
        .retry(policy.backoff())
        .when(AppError::is_transient)
        .adjust(|err: &AppError, planned| policy.adjust_delay(err, planned))
        .notify(|err: &AppError, delay: Duration| {
            log::debug!(
                "[retry] {} failed ({}), retrying in {}ms",
                operation_name,
                err,
                delay.as_millis()
            );
        })
        .await;

    if let Err(err) = &result {
        if err.is_transient() {
            log::warn!(
                "[retry] {} gave up after {} attempts: {}",
                operation_name,
                policy.max_attempts.max(1),
                err
            );
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
            call_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);

        let result = with_retry(&fast_policy(), "get_work_item", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(AppError::network("connection reset"))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&fast_policy(), "list_comments", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::tracker_api_full("bad gateway", 502, "/issues/1"))
        })
        .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&fast_policy(), "get_work_item", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::not_found_with_id("GitLab resource", "/issues/9"))
        })
        .await;

        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            max_attempts: 2,
            ..fast_policy()
        };

        let result: Result<(), _> = with_retry(&policy, "read_file", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(AppError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retry_after_is_capped() {
        let policy = fast_policy();
        let limited = AppError::RateLimited { retry_after_secs: Some(30) };

        let delay = policy.adjust_delay(&limited, Some(Duration::from_millis(1)));
        assert_eq!(delay, Some(Duration::from_millis(5)));

        // An exhausted budget stays exhausted
        assert_eq!(policy.adjust_delay(&limited, None), None);
        assert_eq!(
            policy.adjust_delay(&AppError::network("reset"), Some(Duration::from_millis(2))),
            Some(Duration::from_millis(2))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_waits_for_retry_after() {
        let policy = RetryPolicy {
            max_backoff_ms: 60_000,
            ..fast_policy()
        };
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = with_retry(&policy, "list_comments", || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(AppError::RateLimited { retry_after_secs: Some(7) })
            } else {
                Ok(())
            }
        })
        .await;

        assert!(result.is_ok());
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_single_attempt_policy_never_retries() {
        let policy = RetryPolicy {
            max_attempts: 1,
            ..fast_policy()
        };
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = with_retry(&policy, "get_work_item", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::network("reset"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
