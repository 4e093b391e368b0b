//! Bounded retry with exponential backoff.

use std::future::Future;

use tenbo_core::{CacheError, RetryPolicy, TenboResult};
use tracing::{debug, warn};

/// Run `f` until it succeeds, fails with a non-retryable error, or the
/// policy's attempt budget is spent.
///
/// Only errors for which `TenboError::is_retryable()` holds are retried.
/// Exhausting the budget surfaces `CacheError::RetryExhausted` naming
/// `operation`.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> TenboResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = TenboResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                warn!(
                    operation = operation,
                    attempts = attempt,
                    error = %e,
                    "Retry budget exhausted"
                );
                return Err(CacheError::RetryExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                }
                .into());
            }
            Err(e) => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    operation = operation,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
