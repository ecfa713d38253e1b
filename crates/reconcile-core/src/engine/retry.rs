//! Retry with bounded exponential backoff, and per-call timeouts.

use std::future::Future;
use std::time::Duration;

use reconcile_types::config::RetryConfig;
use reconcile_types::error::ProviderError;
use tokio_util::sync::CancellationToken;

/// Backoff policy for retryable provider errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            backoff_factor: config.backoff_factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based):
    /// `base_delay * backoff_factor^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0).powi(attempt as i32);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Run `operation` until it succeeds, fails terminally, or the attempt
    /// budget is spent. Returns the final result and the number of attempts.
    ///
    /// Cancellation stops further retries; an attempt already running is
    /// never interrupted.
    pub async fn run<T, F, Fut>(
        &self,
        node_id: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> (Result<T, ProviderError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => return (Ok(value), attempt),
                Err(err) => err,
            };

            if !err.retryable || attempt >= self.max_attempts || cancel.is_cancelled() {
                return (Err(err), attempt);
            }

            let delay = self.delay_for_attempt(attempt - 1);
            tracing::warn!(
                node = node_id,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retryable provider error, backing off"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return (Err(err), attempt),
            }
        }
    }
}

/// Await a provider call under `timeout`.
///
/// Expiry becomes a retryable [`ProviderError`]. Non-interruptible calls are
/// awaited to completion regardless of the timeout.
pub async fn call_with_timeout<T, Fut>(
    timeout: Duration,
    interruptible: bool,
    call: Fut,
) -> Result<T, ProviderError>
where
    Fut: Future<Output = Result<T, ProviderError>>,
{
    if !interruptible {
        return call.await;
    }
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::retryable(format!(
            "provider call timed out after {timeout:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_millis(1000));
    }

    #[test]
    fn test_policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }

    #[tokio::test]
    async fn test_retryable_error_retried_until_success() {
        let calls = AtomicU32::new(0);
        let (result, attempts) = fast(5)
            .run("n", &CancellationToken::new(), || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderError::retryable("throttled"))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_terminal_error_not_retried() {
        let calls = AtomicU32::new(0);
        let (result, attempts) = fast(5)
            .run("n", &CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderError::terminal("invalid zone"))
            })
            .await;
        assert!(!result.unwrap_err().retryable);
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_bounded() {
        let (result, attempts) = fast(3)
            .run("n", &CancellationToken::new(), || async {
                Err::<(), _>(ProviderError::retryable("still busy"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_cancel_stops_retries() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (_, attempts) = fast(5)
            .run("n", &cancel, || async {
                Err::<(), _>(ProviderError::retryable("busy"))
            })
            .await;
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retryable() {
        let err = call_with_timeout(Duration::from_millis(10), true, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ProviderError>(())
        })
        .await
        .unwrap_err();
        assert!(err.retryable);
        assert!(err.message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_non_interruptible_call_ignores_timeout() {
        let result = call_with_timeout(Duration::from_millis(1), false, async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok::<_, ProviderError>("done")
        })
        .await;
        assert_eq!(result.unwrap(), "done");
    }
}
