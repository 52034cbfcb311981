//! Failsafe mechanisms: retry with backoff, rate limiting, outbound pacing, health tracking

mod health;
mod outbound;
mod rate_limiter;
mod retry;

pub use health::{HealthMetrics, HealthTracker};
pub use outbound::OutboundPacer;
pub use rate_limiter::{RateLimitDecision, SlidingWindowLimiter, spawn_sweep_task};
pub use retry::{RetryPolicy, is_retryable, with_retry};

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::Result;
use crate::config::RetryConfig;

/// Combined failsafe wrapper for a single provider.
///
/// Composition order per call: pace below the provider's outbound
/// quota, then run the call under the retry policy, then record the
/// outcome in the health tracker. Cache and inbound admission live
/// outside this wrapper.
#[derive(Clone)]
pub struct Failsafe {
    /// Retry policy
    pub retry_policy: RetryPolicy,
    /// Outbound pacer
    pub pacer: Arc<OutboundPacer>,
    /// Health tracker
    pub health: Arc<HealthTracker>,
}

impl Failsafe {
    /// Create a new failsafe for provider `name`.
    #[must_use]
    pub fn new(name: &str, retry: &RetryConfig, requests_per_second: Option<u32>) -> Self {
        Self {
            retry_policy: RetryPolicy::new(retry),
            pacer: Arc::new(OutboundPacer::new(requests_per_second)),
            health: Arc::new(HealthTracker::new(name)),
        }
    }

    /// Run `f` under pacing, retry, and health tracking.
    pub async fn run<F, Fut, T>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.pacer.acquire().await;

        let started = Instant::now();
        match with_retry(&self.retry_policy, operation, f).await {
            Ok(value) => {
                self.health.record_success(started.elapsed());
                Ok(value)
            }
            Err(e) => {
                self.health.record_failure();
                Err(e)
            }
        }
    }
}
