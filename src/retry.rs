//! Bounded retry with linear or exponential backoff
//!
//! Fetch functions report failures as plain `Result` values; this module decides
//! whether and when to call them again. The policy lives entirely in
//! [`RetryConfig`], so it can be tested without any network code.
//!
//! # Example
//!
//! ```no_run
//! use zvuk_dl::retry::{IsRetryable, with_retry};
//! use zvuk_dl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{Backoff, RetryConfig};
use crate::error::{Error, FailureClass};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        matches!(
            self.failure_class(),
            FailureClass::NetworkError | FailureClass::RateLimited
        )
    }
}

/// Result of a retried operation together with the number of attempts it took
#[derive(Debug)]
pub struct Attempted<T, E> {
    /// Final result
    pub result: Result<T, E>,
    /// Attempts made, including the first
    pub attempts: u32,
}

/// Delay to wait after the given failed attempt (1-based), before jitter.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let delay = match config.backoff {
        Backoff::Linear => config.initial_delay.saturating_mul(attempt),
        Backoff::Exponential => Duration::try_from_secs_f64(
            config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(attempt as i32 - 1),
        )
        .unwrap_or(config.max_delay),
    };
    delay.min(config.max_delay)
}

/// Run `operation` until it succeeds, fails permanently, or `max_attempts` is reached.
pub async fn retry_counted<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Attempted<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = backoff_delay(config, attempt);
                let delay = if config.jitter { add_jitter(delay) } else { delay };

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::debug!(error = %e, "Operation failed with non-retryable error");
                }
                return Attempted {
                    result: Err(e),
                    attempts: attempt,
                };
            }
        }
    }
}

/// Like [`retry_counted`], discarding the attempt count.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    retry_counted(config, operation).await.result
}

/// Add up to 100% random jitter to a delay
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
