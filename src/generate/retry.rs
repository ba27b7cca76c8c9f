//! Bounded retry for transient upstream failures
//!
//! Only errors classified retryable are attempted again; validation errors
//! surface immediately so a caller bug is never masked as infrastructure
//! flakiness. Model fallback is layered above this in `generate::mod` — this
//! helper knows nothing about models.

use crate::error::GenerateError;
use std::future::Future;
use std::time::Duration;

/// Attempts per model tier.
pub const MAX_ATTEMPTS: u32 = 3;

/// Delay before the second attempt; doubles for each attempt after that.
pub const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Run `attempt_fn` up to `max_attempts` times, waiting `delay` (doubling)
/// between attempts. The attempt function receives the 1-based attempt
/// number. The last failure is surfaced when attempts are exhausted.
pub async fn with_retry<F, Fut, T>(
    max_attempts: u32,
    delay: Duration,
    mut attempt_fn: F,
) -> Result<T, GenerateError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, GenerateError>>,
{
    debug_assert!(max_attempts >= 1);
    let mut wait = delay;

    for attempt in 1..=max_attempts {
        match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err),
            Err(err) => {
                if attempt == max_attempts {
                    return Err(err);
                }
                tokio::time::sleep(wait).await;
                wait *= 2;
            }
        }
    }

    unreachable!("with_retry returns inside the loop");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = Arc::clone(&calls);

        let result = with_retry(3, Duration::from_millis(10), move |attempt| {
            let calls_ref = Arc::clone(&calls_ref);
            async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                if attempt < 3 {
                    Err(GenerateError::Transient("flaky".into()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts_and_surfaces_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = Arc::clone(&calls);

        let result: Result<(), _> = with_retry(3, Duration::from_millis(10), move |attempt| {
            let calls_ref = Arc::clone(&calls_ref);
            async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err(GenerateError::Transient(format!("failure {}", attempt)))
            }
        })
        .await;

        assert_eq!(
            result.unwrap_err(),
            GenerateError::Transient("failure 3".into())
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_validation_error_is_never_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_ref = Arc::clone(&calls);

        let result: Result<(), _> = with_retry(5, Duration::from_millis(1), move |_| {
            let calls_ref = Arc::clone(&calls_ref);
            async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err(GenerateError::Validation("bad input".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(GenerateError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
