//! Bounded retry with exponential backoff for generation calls.
//!
//! Only transient failures (5xx, timeout, connection refused) are
//! retried. Permanent failures and malformed output propagate on the
//! first attempt. Exhaustion folds the last error into
//! [`GenerationError::RetriesExhausted`] with its classification, so
//! callers can distinguish "the endpoint was down" from "the endpoint
//! rejected us".

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::GenerationError;

/// Retry budget for generation calls. Delays double per attempt starting
/// at `base_delay` (1s, 2s, ... before attempts 2, 3, ...).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-based; attempt 1 has no delay).
    fn delay_before(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(2))
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping between attempts.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, GenerationError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GenerationError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut last_err = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(policy.delay_before(attempt)).await;
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                warn!(attempt, error = %err, "transient generation failure");
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    let err = last_err.unwrap_or(GenerationError::Timeout);
    Err(GenerationError::RetriesExhausted {
        attempts,
        classification: err.classification(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorClass;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn transient() -> GenerationError {
        GenerationError::Status {
            code: 503,
            message: "unavailable".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_first_attempt_without_sleeping() {
        let start = Instant::now();
        let result = with_retry(&RetryPolicy::default(), || async { Ok::<_, _>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_with_doubling_backoff() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = with_retry(&RetryPolicy::default(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(transient())
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 1s before attempt 2, 2s before attempt 3.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(GenerationError::Status {
                    code: 401,
                    message: "unauthorized".into(),
                })
            }
        })
        .await;
        assert!(matches!(
            result.unwrap_err(),
            GenerationError::Status { code: 401, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_output_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(GenerationError::Malformed {
                    message: "bad json".into(),
                })
            }
        })
        .await;
        assert!(matches!(
            result.unwrap_err(),
            GenerationError::Malformed { .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_attempts_and_classification() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(transient()) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result.unwrap_err() {
            GenerationError::RetriesExhausted {
                attempts,
                classification,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(classification, ErrorClass::Transient);
            }
            other => panic!("expected RetriesExhausted, got {:?}", other),
        }
    }
}
