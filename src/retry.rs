//! Retry policies with exponential or constant backoff
//!
//! A [`RetryPolicy`] is a plain value (attempt budget, backoff shape, jitter) that
//! each call site pairs with its own retryable predicate. There is no registry of
//! policies: the scanner, tracker and acquirer each build the policy they need.
//!
//! # Example
//!
//! ```no_run
//! use feed_mirror::retry::{RetryPolicy, retry_with};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), std::io::Error> {
//! let policy = RetryPolicy::constant(Some(3), Duration::from_secs(1));
//! let value = retry_with(
//!     &policy,
//!     |e: &std::io::Error| e.kind() == std::io::ErrorKind::TimedOut,
//!     || async { Ok::<_, std::io::Error>(42) },
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, dropped connections, rate limiting) return `true`.
/// Permanent failures (bad status, corrupt data, rejected requests) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

/// Source API codes that signal a temporary condition (rate limits, internal errors)
const RETRYABLE_SOURCE_CODES: [i32; 5] = [1, 6, 9, 10, 29];

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect() || e.is_body(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Transfer(_) => true,
            Error::SourceApi { code, .. } => RETRYABLE_SOURCE_CODES.contains(code),
            Error::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            Error::Config { .. }
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::Archive(_)
            | Error::Metadata(_)
            | Error::Delivery(_)
            | Error::Serialization(_)
            | Error::NotSupported(_)
            | Error::ShuttingDown
            | Error::Other(_) => false,
        }
    }
}

/// Shape of the delay between attempts
#[derive(Clone, Debug, PartialEq)]
pub enum Backoff {
    /// Same delay every time
    Constant(Duration),
    /// `initial * multiplier^(n-1)`, capped at `max`
    Exponential {
        /// Delay before the first retry
        initial: Duration,
        /// Growth factor per retry
        multiplier: f64,
        /// Upper bound for any single delay
        max: Duration,
    },
}

impl Backoff {
    /// Delay before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        match self {
            Backoff::Constant(delay) => *delay,
            Backoff::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let exponent = retry.saturating_sub(1).min(64) as i32;
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

/// Attempt budget plus backoff shape
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (None = unbounded)
    pub max_attempts: Option<u32>,
    /// Delay schedule
    pub backoff: Backoff,
    /// Stretch each delay by a random 0-100%
    pub jitter: bool,
}

impl RetryPolicy {
    /// Fixed delay, no jitter
    pub fn constant(max_attempts: Option<u32>, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Constant(delay),
            jitter: false,
        }
    }

    /// Whether retry number `retry` (1-based) is still within budget
    pub fn allows(&self, retry: u32) -> bool {
        self.max_attempts.is_none_or(|max| retry <= max)
    }

    /// Delay before retry number `retry`, with jitter applied when enabled
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.backoff.delay(retry);
        if self.jitter { add_jitter(delay) } else { delay }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: Backoff::Exponential {
                initial: config.initial_delay,
                multiplier: config.backoff_multiplier,
                max: config.max_delay,
            },
            jitter: config.jitter,
        }
    }
}

/// Run `operation`, retrying failures that `retryable` accepts while the policy allows
///
/// Returns the successful result or the last error.
pub async fn retry_with<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if retry > 0 {
                    tracing::info!(attempts = retry + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if retryable(&e) && policy.allows(retry + 1) => {
                retry += 1;
                let delay = policy.delay_for(retry);

                tracing::warn!(
                    error = %e,
                    attempt = retry,
                    max_attempts = ?policy.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if retryable(&e) {
                    tracing::error!(
                        error = %e,
                        attempts = retry + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// [`retry_with`] using the error's own [`IsRetryable`] classification
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    retry_with(policy, E::is_retryable, operation).await
}

/// Repeat `operation` until `done` accepts its result or the policy runs out
///
/// Errors are returned immediately. When the budget is exhausted the last
/// result is returned as-is.
pub async fn poll_until<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    done: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&T) -> bool,
{
    let mut retry = 0;

    loop {
        let result = operation().await?;
        if done(&result) || !policy.allows(retry + 1) {
            return Ok(result);
        }
        retry += 1;
        tokio::time::sleep(policy.delay_for(retry)).await;
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
