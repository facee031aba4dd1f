//! Bounded exponential backoff
//!
//! Wraps a fallible async operation and retries it while the error is
//! transient, sleeping a jittered, exponentially growing delay between
//! attempts. Sleeps and the operation itself race the cancellation token.

use crate::config::{RetryConfig, ValidationConfig};
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Classifies an error as worth retrying or not
pub trait Retryable {
    /// Whether another attempt could succeed
    fn is_transient(&self) -> bool;

    /// Server-provided hint for the next delay, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Outcome of a call that did not succeed
#[derive(Debug, Error)]
pub enum RetryError<E: Display> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("permanent failure on attempt {attempts}: {error}")]
    Permanent { attempts: u32, error: E },

    #[error("cancelled")]
    Cancelled,
}

impl<E: Display> RetryError<E> {
    /// Number of attempts made before giving up (0 when cancelled)
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } | Self::Permanent { attempts, .. } => *attempts,
            Self::Cancelled => 0,
        }
    }
}

/// Attempt budget and delay range for one retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            min_delay,
            max_delay,
        }
    }

    /// Upper end of the delay range after failed attempt `attempt` (1-based)
    ///
    /// Doubles from `min_delay` with each attempt and never exceeds
    /// `max_delay`.
    pub fn ceiling_for_attempt(&self, attempt: u32) -> Duration {
        let min_ms = self.min_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        let ceiling = min_ms.saturating_mul(factor).clamp(min_ms, max_ms.max(min_ms));
        Duration::from_millis(ceiling)
    }

    /// Jittered delay to sleep after failed attempt `attempt` (1-based)
    ///
    /// Drawn uniformly from `min_delay..=ceiling_for_attempt(attempt)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let floor = self.min_delay.as_millis() as u64;
        let ceiling = self.ceiling_for_attempt(attempt).as_millis() as u64;
        if ceiling <= floor {
            return Duration::from_millis(floor);
        }
        Duration::from_millis(rand::rng().random_range(floor..=ceiling))
    }

    fn clamp(&self, delay: Duration) -> Duration {
        delay.clamp(self.min_delay, self.max_delay.max(self.min_delay))
    }
}

impl From<&RetryConfig> for BackoffPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.min_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }
}

impl From<&ValidationConfig> for BackoffPolicy {
    fn from(config: &ValidationConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.min_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }
}

/// Sleeps for `delay` unless `cancel` fires first
///
/// Returns `false` when the sleep was cut short by cancellation.
pub async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Runs `op` until it succeeds, fails permanently or the budget runs out
///
/// `op` receives the 1-based attempt number. At most `policy.max_attempts`
/// calls are made.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable + Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            result = op(attempt) => result,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if !error.is_transient() {
            return Err(RetryError::Permanent {
                attempts: attempt,
                error,
            });
        }

        if attempt >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: error,
            });
        }

        let delay = match error.retry_after() {
            Some(hint) => policy.clamp(hint),
            None => policy.delay_for_attempt(attempt),
        };

        tracing::debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Transient failure, retrying: {}",
            error
        );

        if !sleep_or_cancel(delay, cancel).await {
            return Err(RetryError::Cancelled);
        }
    }
}
