//! Outbound request pacing for keyed providers
//!
//! Smooths calls to a provider below its contractual requests-per-second
//! quota. This is the outbound counterpart of the inbound sliding-window
//! limiter: inbound admission rejects, outbound pacing waits.

use std::num::NonZeroU32;

use governor::{Quota, RateLimiter as GovernorLimiter};

type DirectLimiter = GovernorLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Paces outbound calls to a single provider.
///
/// With no quota configured, `acquire` returns immediately.
pub struct OutboundPacer {
    inner: Option<DirectLimiter>,
}

impl OutboundPacer {
    /// Create a pacer allowing `requests_per_second` sustained calls,
    /// or an unlimited pacer when `None`.
    #[must_use]
    pub fn new(requests_per_second: Option<u32>) -> Self {
        let inner = requests_per_second
            .and_then(NonZeroU32::new)
            .map(|rps| GovernorLimiter::direct(Quota::per_second(rps)));
        Self { inner }
    }

    /// Wait until the provider's quota admits one more call.
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.inner {
            limiter.until_ready().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn unlimited_pacer_never_waits() {
        let pacer = OutboundPacer::new(None);
        let start = Instant::now();
        for _ in 0..100 {
            pacer.acquire().await;
        }
        assert!(start.elapsed().as_millis() < 50);
    }

    #[tokio::test]
    async fn pacer_spreads_calls_over_time() {
        // 20 rps -> 50ms between sustained calls; the burst allowance
        // covers the first, later ones must wait.
        let pacer = OutboundPacer::new(Some(20));
        let start = Instant::now();
        for _ in 0..3 {
            pacer.acquire().await;
        }
        assert!(start.elapsed() >= std::time::Duration::from_millis(80));
    }

    #[tokio::test]
    async fn zero_rps_is_treated_as_unlimited() {
        let pacer = OutboundPacer::new(Some(0));
        pacer.acquire().await;
    }
}
