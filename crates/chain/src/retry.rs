//! Timeout and retry policy applied to every outbound call.

use std::future::Future;
use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::debug;

use crate::error::{ChainError, ChainResult};

/// Bounded retry with exponential backoff. Every attempt is individually
/// wrapped in `timeout`; only transient errors are retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub attempts: usize,
    /// Backoff unit; delays grow as 2x, 4x, 8x of this value.
    pub base_delay: Duration,
    /// Upper bound on a single backoff delay.
    pub max_delay: Duration,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no backoff. Used for side-effecting calls such as broadcasts.
    pub fn once(timeout: Duration) -> Self {
        Self {
            attempts: 1,
            timeout,
            ..Self::default()
        }
    }

    fn backoff(&self) -> impl Iterator<Item = Duration> {
        let factor = self.base_delay.as_millis().max(1) as u64;
        ExponentialBackoff::from_millis(2)
            .factor(factor)
            .max_delay(self.max_delay)
            .map(jitter)
            .take(self.attempts.saturating_sub(1))
    }

    /// Run `op` under this policy.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> ChainResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ChainResult<T>>,
    {
        let timeout = self.timeout;
        RetryIf::start(
            self.backoff(),
            || {
                let attempt = op();
                async move {
                    match tokio::time::timeout(timeout, attempt).await {
                        Ok(result) => result,
                        Err(_) => {
                            debug!(operation, timeout_ms = timeout.as_millis() as u64, "Call timed out");
                            Err(ChainError::Timeout {
                                operation,
                                timeout_ms: timeout.as_millis() as u64,
                            })
                        }
                    }
                }
            },
            ChainError::is_transient,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy(attempts: usize) -> RetryPolicy {
        RetryPolicy {
            attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_transient_errors_retried() {
        let calls = AtomicUsize::new(0);
        let result = fast_policy(3)
            .run("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ChainError::ChainRead("connection reset".into()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: ChainResult<()> = fast_policy(5)
            .run("bad-input", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ChainError::Validation("length mismatch".into())) }
            })
            .await;

        assert!(matches!(result, Err(ChainError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stalled_call_times_out() {
        let result: ChainResult<()> = fast_policy(1)
            .run("stalled", || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(ChainError::Timeout { operation: "stalled", .. })));
    }
}
