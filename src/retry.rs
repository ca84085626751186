//! Retry classification and backoff
//!
//! The CDX index sheds load with 429/503 responses and very slow pages. Those
//! are worth waiting out; everything else (bad query, refused connection,
//! undecodable body) fails the current attempt immediately.
//!
//! Backoff is a fixed exponential schedule with no jitter. Every wait is raced
//! against a [`CancellationToken`] so a user stop is seen within one interval.

use crate::config::{MAX_RETRY_DELAY, RetryConfig};
use crate::error::FetchError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Outcome of classifying a failed request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryClass {
    /// Rate limited or timed out; the same request may succeed later
    Retryable,
    /// Retrying will not help
    Fatal,
}

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        classify(self) == RetryClass::Retryable
    }
}

/// Classify a fetch error
///
/// Retryable iff the server signalled rate limiting (429, 503) or the request
/// ran out of time. Stateless.
pub fn classify(error: &FetchError) -> RetryClass {
    match error {
        FetchError::HttpStatus {
            status: 429 | 503, ..
        }
        | FetchError::Timeout(_) => RetryClass::Retryable,
        FetchError::HttpStatus { .. }
        | FetchError::Transport(_)
        | FetchError::Decode(_)
        | FetchError::Cancelled
        | FetchError::RetriesExhausted { .. } => RetryClass::Fatal,
    }
}

/// Delay before retry number `attempt` (1-based)
///
/// With the defaults this yields 10s, 20s, 40s. Never exceeds
/// [`MAX_RETRY_DELAY`], whatever the configuration.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(30) as i32;
    let factor = config.backoff_multiplier.powi(exponent);
    Duration::try_from_secs_f64(config.initial_delay.as_secs_f64() * factor)
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY)
}

/// Sleep for `delay` unless `cancel` fires first
///
/// Returns `false` if the wait was cut short by cancellation.
pub async fn wait_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Run a single request with the page retry policy
///
/// Used for one-shot lookups that are not part of a paginated fetch. Returns
/// [`FetchError::RetriesExhausted`] once the budget is spent and
/// [`FetchError::Cancelled`] if cancelled before or during a wait.
pub async fn fetch_with_retry<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Request succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;
                let delay = backoff_delay(config, attempt);

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Request failed, retrying"
                );

                if !wait_or_cancel(delay, cancel).await {
                    return Err(FetchError::Cancelled);
                }
            }
            Err(e) if e.is_retryable() => {
                tracing::error!(
                    error = %e,
                    attempts = attempt + 1,
                    "Request failed after all retry attempts exhausted"
                );
                return Err(FetchError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(e),
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "Request failed with non-retryable error");
                return Err(e);
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn rate_limited() -> FetchError {
        FetchError::http_status(429, "Too Many Requests")
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn rate_limits_and_timeouts_are_retryable() {
        assert_eq!(classify(&rate_limited()), RetryClass::Retryable);
        assert_eq!(
            classify(&FetchError::http_status(503, "")),
            RetryClass::Retryable
        );
        assert_eq!(
            classify(&FetchError::Timeout(Duration::from_secs(180))),
            RetryClass::Retryable
        );
    }

    #[test]
    fn other_failures_are_fatal() {
        let fatal = [
            FetchError::http_status(400, "bad query"),
            FetchError::http_status(404, ""),
            FetchError::http_status(500, ""),
            FetchError::Transport("connection refused".to_string()),
            FetchError::Decode("failed to parse JSON".to_string()),
            FetchError::Cancelled,
            FetchError::RetriesExhausted {
                attempts: 3,
                source: Box::new(rate_limited()),
            },
        ];
        for err in fatal {
            assert_eq!(classify(&err), RetryClass::Fatal, "{err:?}");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn backoff_doubles_from_ten_seconds() {
        let config = RetryConfig::default();
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(10));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(20));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(40));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let config = RetryConfig {
            backoff_multiplier: 1e20,
            ..RetryConfig::default()
        };
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(10));
        assert_eq!(backoff_delay(&config, 2), MAX_RETRY_DELAY);
        assert_eq!(backoff_delay(&config, 30), MAX_RETRY_DELAY);

        let config = RetryConfig {
            initial_delay: Duration::from_secs(600),
            ..RetryConfig::default()
        };
        assert_eq!(backoff_delay(&config, 4), MAX_RETRY_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_completes_without_cancel() {
        let cancel = CancellationToken::new();
        assert!(wait_or_cancel(Duration::from_secs(10), &cancel).await);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_cut_short_by_cancel() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let start = tokio::time::Instant::now();
        assert!(!wait_or_cancel(Duration::from_secs(40), &cancel).await);
        assert!(start.elapsed() < Duration::from_secs(40));
    }

    #[tokio::test]
    async fn retry_transient_then_succeed() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let cancel = CancellationToken::new();

        let result = fetch_with_retry(&fast_config(), &cancel, || {
            let counter = counter_clone.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(rate_limited())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_budget_exhausted() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let cancel = CancellationToken::new();

        let result = fetch_with_retry(&fast_config(), &cancel, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(rate_limited())
            }
        })
        .await;

        match result {
            Err(FetchError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 3);
                assert_eq!(*source, rate_limited());
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4, "initial try + 3 retries");
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let cancel = CancellationToken::new();

        let result = fetch_with_retry(&fast_config(), &cancel, || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(FetchError::Transport("connection refused".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(FetchError::Transport(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_first_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result =
            fetch_with_retry(&fast_config(), &cancel, || async { Ok::<_, FetchError>(1) }).await;
        assert_eq!(result, Err(FetchError::Cancelled));
    }
}
