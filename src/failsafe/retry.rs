//! Retry logic with bounded exponential backoff
//!
//! Retries a single remote call on an explicit allow-list of transient
//! conditions. The allow-list is configuration, never a catch-all, so
//! permanent failures are not masked as transient ones.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio::time::sleep;
use tracing::debug;

use crate::Error;
use crate::config::{RetryConfig, RetryableErrors};

/// Retry policy configuration
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum attempts (including the first call)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Upper bound for the random jitter added to each delay
    pub max_jitter: Duration,
    /// Which failures are worth retrying
    pub retry_on: RetryableErrors,
}

impl RetryPolicy {
    /// Create from config
    #[must_use]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            retry_on: config.retry_on.clone(),
            max_jitter: config.max_jitter,
        }
    }

    /// Delay before retrying after failed attempt `attempt` (0-indexed):
    /// `min(initial * 2^attempt + jitter, max)`.
    ///
    /// The jitter spreads out retries when many callers fail against
    /// the same upstream outage at once.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(self.max_delay);
        let jitter_ms = self.max_jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
        };
        (base + jitter).min(self.max_delay)
    }
}

/// Whether `error` matches the retryable allow-list.
#[must_use]
pub fn is_retryable(error: &Error, allow: &RetryableErrors) -> bool {
    if let Some(status) = error.provider_status() {
        return allow.statuses.contains(&status)
            || (allow.server_errors && (500..=599).contains(&status));
    }
    allow.transport && error.is_transport()
}

/// Execute a future-producing closure with retry.
///
/// Invokes `f` up to `max_attempts` times, sleeping between attempts
/// per the policy's backoff schedule. The last error is propagated
/// unchanged in kind; non-retryable errors propagate immediately
/// without consuming a retry.
///
/// # Errors
///
/// Returns the last error from `f` if all attempts are exhausted or
/// the error is not retryable.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, name: &str, mut f: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempts = 0u32;

    loop {
        attempts += 1;

        match f().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_retryable(&e, &policy.retry_on) {
                    return Err(e);
                }

                if attempts >= policy.max_attempts {
                    debug!(
                        operation = name,
                        attempts,
                        "Max retry attempts reached"
                    );
                    return Err(e);
                }

                let delay = policy.delay_for(attempts - 1);
                debug!(
                    operation = name,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after backoff"
                );
                sleep(delay).await;
            }
        }
    }
}
