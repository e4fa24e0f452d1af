//! Retry with exponential backoff, layered above the circuit breaker.
//!
//! Only `unavailable`, `timeout` and `execution_error` are retried.
//! Validation and not-found errors return immediately.

use crate::error::{QueryError, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

/// Calculate the delay for the next retry attempt with exponential backoff.
pub fn next_retry_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let multiplier = 2_u64.saturating_pow(attempt);
    let delay = base_ms.saturating_mul(multiplier);
    let jitter = rand::thread_rng().gen_range(0..=base_ms);
    Duration::from_millis(delay.saturating_add(jitter).min(max_ms))
}

/// Execute an async operation with retries.
pub async fn retry_async<T, F, Fut>(operation_name: &str, policy: RetryPolicy, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !e.code().is_retryable() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    error!(
                        "Failed to execute '{}' after {} attempts: {}",
                        operation_name, policy.max_attempts, e
                    );
                    return Err(e);
                }
                let mut delay = next_retry_delay(attempt, policy.base_delay_ms, policy.max_delay_ms);
                if let QueryError::Unavailable { retry_after_secs, .. } = &e {
                    delay = delay.max(Duration::from_secs_f64(retry_after_secs.max(0.0)));
                }
                warn!(
                    "Operation '{}' failed. Retrying in {:?} (Attempt {}/{}): {}",
                    operation_name, delay, attempt, policy.max_attempts, e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    #[test]
    fn test_delay_is_capped() {
        assert!(next_retry_delay(10, 100, 1_000) <= Duration::from_millis(1_000));
        assert!(next_retry_delay(1, 100, 10_000) >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = &AtomicU32::new(0);
        let result = retry_async("flaky", fast(), move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(QueryError::Timeout("slow".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_validation_errors_not_retried() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = retry_async("bad", fast(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(QueryError::validation("nope"))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = &AtomicU32::new(0);
        let result: Result<()> = retry_async("down", fast(), move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(QueryError::Execution("boom".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
