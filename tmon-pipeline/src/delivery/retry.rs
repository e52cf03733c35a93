//! Bounded retry with linear backoff
//!
//! Every outbound hop (search, body fetch, batch delivery, compute,
//! notification) goes through one [`RetryPolicy`].
//!
//! **Algorithm:**
//! 1. Run the action, bounded by `call_timeout`
//! 2. On success, return the value
//! 3. On a permanent failure (not found, validation), return it immediately
//! 4. On a transient failure or timeout:
//!    a. If attempts remain: log WARN, sleep `base_delay * attempt`, retry
//!    b. Otherwise: log ERROR, return `DeliveryExhausted` carrying the last error
//!
//! With `max_attempts = N` the sleeps total `sum(base_delay * k, k = 1..N-1)`.
//! The sleep suspends only the calling task.

use std::future::Future;
use std::time::{Duration, Instant};

use tmon_common::config::RetryConfig;

use crate::error::PipelineError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    call_timeout: Duration,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one
    pub fn new(max_attempts: u32, base_delay: Duration, call_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            call_timeout,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay(), config.call_timeout())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleep taken after failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Run `action` until it succeeds, fails permanently, or attempts run out
    ///
    /// # Arguments
    /// * `destination` - Name for logging and for the exhaustion report
    /// * `action` - Async closure performing one attempt
    pub async fn attempt<F, Fut, T>(&self, destination: &str, action: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        self.attempt_counted(destination, action).await.0
    }

    /// Like [`attempt`](Self::attempt), also reporting how many attempts ran
    pub async fn attempt_counted<F, Fut, T>(
        &self,
        destination: &str,
        mut action: F,
    ) -> (Result<T, PipelineError>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let start_time = Instant::now();
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let outcome = match tokio::time::timeout(self.call_timeout, action()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(PipelineError::Timeout(self.call_timeout)),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(
                            destination,
                            attempt,
                            elapsed_ms = start_time.elapsed().as_millis(),
                            "Call succeeded after retry"
                        );
                    } else {
                        tracing::trace!(destination, "Call succeeded");
                    }
                    return (Ok(value), attempt);
                }
                Err(err) if !err.is_transient() => {
                    tracing::debug!(
                        destination,
                        attempt,
                        error = %err,
                        "Call failed permanently, not retrying"
                    );
                    return (Err(err), attempt);
                }
                Err(err) => {
                    if attempt >= self.max_attempts {
                        tracing::error!(
                            destination,
                            attempt,
                            elapsed_ms = start_time.elapsed().as_millis(),
                            error = %err,
                            "Delivery exhausted: max attempts reached"
                        );
                        return (
                            Err(PipelineError::DeliveryExhausted {
                                destination: destination.to_string(),
                                attempts: attempt,
                                last_error: err.to_string(),
                            }),
                            attempt,
                        );
                    }

                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        destination,
                        attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %err,
                        "Call failed, will retry after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(5), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let (result, attempts) = fast_policy(3)
            .attempt_counted("test", || async { Ok::<_, PipelineError>(42) })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = fast_policy(3)
            .attempt("test", || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(PipelineError::Transient("503".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error_and_attempt_count() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = fast_policy(4)
            .attempt("storage", || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { Err(PipelineError::Transient(format!("failure {}", n))) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result.unwrap_err() {
            PipelineError::DeliveryExhausted {
                destination,
                attempts,
                last_error,
            } => {
                assert_eq!(destination, "storage");
                assert_eq!(attempts, 4);
                assert!(last_error.contains("failure 4"));
            }
            other => panic!("expected DeliveryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = fast_policy(5)
            .attempt("source.body", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(PipelineError::NotFound("gone".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(PipelineError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failed_attempt() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(20));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = policy
            .attempt("compute", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result.unwrap_err() {
            PipelineError::DeliveryExhausted { last_error, .. } => {
                assert!(last_error.contains("timed out"))
            }
            other => panic!("expected DeliveryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_linear_backoff_bounds_wall_clock() {
        // N = 3 with 20ms base sleeps 20ms + 40ms
        let policy = RetryPolicy::new(3, Duration::from_millis(20), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_millis(20));
        assert_eq!(policy.backoff(2), Duration::from_millis(40));

        let start = Instant::now();
        let _: Result<(), _> = policy
            .attempt("test", || async { Err(PipelineError::Transient("down".into())) })
            .await;
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_millis(60));
        assert!(elapsed < Duration::from_millis(1000));
    }

    #[test]
    fn test_zero_attempts_clamped() {
        assert_eq!(fast_policy(0).max_attempts(), 1);
    }
}
