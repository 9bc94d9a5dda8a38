//! Retry configuration and exponential backoff for immediate sends.
//!
//! When a [`RetryConfig`] is set on the transport, an immediate send that
//! fails with [`SendError::TransportRetryable`] is attempted again after a
//! backoff delay. Each attempt builds a fresh broker message.
//!
//! # Retry Strategy
//!
//! - Only [`SendError::TransportRetryable`] is retried
//! - Exponential backoff with ±25% jitter to avoid synchronized retries
//! - Delay capped at `max_delay`
//! - Backoff sleeps observe the send's cancellation token

use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::BuildHasher;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{Result, SendError};

/// Retry configuration with exponential backoff.
///
/// ```
/// use mom_send::RetryConfig;
/// use std::time::Duration;
///
/// let retry = RetryConfig {
///     max_attempts: 5,
///     multiplier: 2.0,
///     initial_delay: Duration::from_millis(100),
///     max_delay: Duration::from_secs(10),
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt (0 = no retries).
    pub max_attempts: u32,

    /// Backoff multiplier applied to the delay after each retry.
    pub multiplier: f32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Upper bound for the delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    /// - `max_attempts`: 3
    /// - `multiplier`: 2.0
    /// - `initial_delay`: 100ms
    /// - `max_delay`: 5s
    fn default() -> Self {
        // ---
        Self {
            max_attempts: 3,
            multiplier: 2.0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Reject a multiplier that cannot produce a delay: NaN, infinite or
    /// negative.
    pub(crate) fn validate(&self) -> Result<()> {
        // ---
        if !self.multiplier.is_finite() || self.multiplier < 0.0 {
            return Err(SendError::ConfigConflict(format!(
                "retry multiplier must be finite and non-negative, got {}",
                self.multiplier
            )));
        }
        Ok(())
    }
}

/// Run `operation`, retrying retryable faults per `retry_config`.
///
/// With `None` the operation runs exactly once. Non-retryable faults are
/// returned immediately. If `cancel` fires during a backoff delay the retry
/// loop stops with [`SendError::Cancelled`].
pub(crate) async fn retry_with_backoff<F, Fut, T>(
    retry_config: Option<&RetryConfig>,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let Some(retry_config) = retry_config else {
        return operation().await;
    };

    let mut attempt = 0;
    let mut current_delay = retry_config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(SendError::TransportRetryable(details)) => {
                attempt += 1;

                if attempt > retry_config.max_attempts {
                    log_debug!(
                        attempts = retry_config.max_attempts,
                        error = %details,
                        "retry exhausted"
                    );
                    return Err(SendError::TransportRetryable(details));
                }

                let jittered_delay = apply_jitter(current_delay);

                log_debug!(
                    attempt,
                    max_attempts = retry_config.max_attempts,
                    delay = ?jittered_delay,
                    error = %details,
                    "retrying send"
                );

                tokio::select! {
                    _ = cancel.cancelled() => return Err(SendError::Cancelled),
                    _ = sleep(jittered_delay) => {}
                }

                // Out of range for a Duration means past any sane cap
                let next_delay = Duration::try_from_secs_f64(
                    current_delay.as_secs_f64() * retry_config.multiplier as f64,
                )
                .unwrap_or(retry_config.max_delay);
                current_delay = next_delay.min(retry_config.max_delay);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Apply ±25% jitter: `delay * (0.75 + random(0.0..0.5))`.
fn apply_jitter(delay: Duration) -> Duration {
    // ---
    let random_state = RandomState::new();
    let hash = random_state.hash_one(std::time::SystemTime::now());

    let random_factor = (hash % 1000) as f64 / 1000.0;
    let jitter_multiplier = 0.75 + (random_factor * 0.5);

    Duration::try_from_secs_f64(delay.as_secs_f64() * jitter_multiplier).unwrap_or(delay)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            multiplier: 2.0,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_none_config_executes_once() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result = retry_with_backoff(None, &token, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(SendError::TransportRetryable("busy".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(SendError::TransportRetryable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result = retry_with_backoff(Some(&fast_retry(3)), &token, || {
            let calls = calls.clone();
            async move {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt < 3 {
                    Err(SendError::TransportRetryable("busy".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_fault() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result = retry_with_backoff(Some(&fast_retry(2)), &token, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(SendError::TransportRetryable("always".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(SendError::TransportRetryable(_))));
        // Initial attempt + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result = retry_with_backoff(Some(&RetryConfig::default()), &token, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(SendError::Transport("gone".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(SendError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        // ---
        let token = CancellationToken::new();
        let config = RetryConfig {
            max_attempts: 5,
            multiplier: 1.0,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
        };

        let canceller = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = retry_with_backoff(Some(&config), &token, || async {
            Err::<(), _>(SendError::TransportRetryable("busy".into()))
        })
        .await;

        assert!(matches!(result, Err(SendError::Cancelled)));
    }

    #[tokio::test]
    async fn test_huge_multiplier_is_capped_at_max_delay() {
        // ---
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();
        let config = RetryConfig {
            max_attempts: 3,
            multiplier: f32::MAX,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };

        let result = retry_with_backoff(Some(&config), &token, || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(SendError::TransportRetryable("busy".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(SendError::TransportRetryable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_validate_rejects_unusable_multiplier() {
        // ---
        for multiplier in [f32::NAN, f32::INFINITY, -1.0] {
            let config = RetryConfig {
                multiplier,
                ..RetryConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(SendError::ConfigConflict(_))),
                "multiplier {multiplier} accepted"
            );
        }

        assert!(RetryConfig::default().validate().is_ok());
        let flat = RetryConfig {
            multiplier: 0.0,
            ..RetryConfig::default()
        };
        assert!(flat.validate().is_ok());
    }

    #[test]
    fn test_jitter_range() {
        // ---
        let delay = Duration::from_millis(100);

        for _ in 0..100 {
            let jittered = apply_jitter(delay);
            assert!(jittered >= Duration::from_millis(75), "jitter too low: {jittered:?}");
            assert!(jittered <= Duration::from_millis(125), "jitter too high: {jittered:?}");
        }
    }
}
