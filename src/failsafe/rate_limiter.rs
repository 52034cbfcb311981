//! Sliding-window rate limiting
//!
//! Per-identifier admission control over a continuously moving time
//! window. Unlike a fixed-window counter, bursts aligned to a window
//! boundary cannot double the effective rate: every check discards
//! timestamps older than the window and counts what survives.
//!
//! State is process-local and advisory. A restart resets all counters,
//! which is acceptable for best-effort fair use.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tracing::debug;

/// Milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Per-identifier window record: admission timestamps plus the window
/// length last used for this identifier, so the sweep can prune
/// without knowing each caller's policy.
struct WindowRecord {
    timestamps: Vec<u64>,
    window_ms: u64,
}

/// Outcome of an admission check.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// The limit the check ran against
    pub limit: u32,
    /// Admissions left in the current window (0 when denied)
    pub remaining: u32,
    /// Epoch millis when the oldest in-window admission ages out
    pub reset_at: u64,
    /// How long to wait before the next admission can succeed
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    /// Retry-after rounded up to whole seconds, for the HTTP header.
    #[must_use]
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after
            .map_or(0, |d| d.as_millis().div_ceil(1000) as u64)
    }
}

/// Sliding-window rate limiter keyed by identifier.
///
/// Identifiers compose a scope and a client key (e.g. `global:10.0.0.7`
/// or `recommend:10.0.0.7`). Distinct identifiers are fully
/// independent.
#[derive(Default)]
pub struct SlidingWindowLimiter {
    windows: DashMap<String, WindowRecord>,
}

impl SlidingWindowLimiter {
    /// Create an empty limiter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Check (and on success consume) an admission slot for
    /// `identifier` under `limit` requests per `window`.
    pub fn check(&self, identifier: &str, limit: u32, window: Duration) -> RateLimitDecision {
        let now = now_millis();
        let window_ms = window.as_millis() as u64;

        let mut record = self
            .windows
            .entry(identifier.to_string())
            .or_insert_with(|| WindowRecord {
                timestamps: Vec::new(),
                window_ms,
            });
        record.window_ms = window_ms;
        record
            .timestamps
            .retain(|&t| now.saturating_sub(t) < window_ms);

        if (record.timestamps.len() as u32) < limit {
            record.timestamps.push(now);
            let count = record.timestamps.len() as u32;
            // Oldest surviving timestamp decides when a slot frees up
            let oldest = record.timestamps.first().copied().unwrap_or(now);
            RateLimitDecision {
                allowed: true,
                limit,
                remaining: limit - count,
                reset_at: oldest + window_ms,
                retry_after: None,
            }
        } else {
            let oldest = record.timestamps.first().copied().unwrap_or(now);
            let reset_at = oldest + window_ms;
            let wait = Duration::from_millis(reset_at.saturating_sub(now));
            debug!(identifier, limit, wait_ms = wait.as_millis() as u64, "Rate limit exceeded");
            RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                reset_at,
                retry_after: Some(wait),
            }
        }
    }

    /// Number of identifiers currently tracked.
    pub fn tracked_identifiers(&self) -> usize {
        self.windows.len()
    }

    /// Drop identifiers whose every timestamp has aged out of their
    /// window. Bounds memory under sustained low traffic.
    pub fn sweep(&self) {
        let now = now_millis();
        let before = self.windows.len();
        self.windows.retain(|_, record| {
            record
                .timestamps
                .iter()
                .any(|&t| now.saturating_sub(t) < record.window_ms)
        });
        let removed = before - self.windows.len();
        if removed > 0 {
            debug!(removed, "Swept idle rate limit identifiers");
        }
    }
}

/// Spawn a background tokio task that periodically sweeps idle
/// identifiers. Stops when the `Arc` strong count drops to 1.
pub fn spawn_sweep_task(limiter: Arc<SlidingWindowLimiter>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if Arc::strong_count(&limiter) <= 1 {
                break;
            }
            limiter.sweep();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn admits_up_to_limit_then_denies() {
        let limiter = SlidingWindowLimiter::new();
        let window = Duration::from_millis(1000);

        let first = limiter.check("search:client", 2, window);
        let second = limiter.check("search:client", 2, window);
        let third = limiter.check("search:client", 2, window);

        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
        // First admission ages out ~1s after it was made
        assert_eq!(third.retry_after_secs(), 1);
    }

    #[test]
    fn window_slides_rather_than_resets() {
        let limiter = SlidingWindowLimiter::new();
        let window = Duration::from_millis(100);

        assert!(limiter.check("id", 2, window).allowed);
        thread::sleep(Duration::from_millis(60));
        assert!(limiter.check("id", 2, window).allowed);
        // Inside the sliding window both admissions still count
        assert!(!limiter.check("id", 2, window).allowed);

        // After the first admission ages out, exactly one slot frees up
        thread::sleep(Duration::from_millis(60));
        assert!(limiter.check("id", 2, window).allowed);
        assert!(!limiter.check("id", 2, window).allowed);
    }

    #[test]
    fn no_more_than_limit_in_any_sliding_subinterval() {
        let limiter = SlidingWindowLimiter::new();
        let window = Duration::from_millis(80);
        let limit = 3;

        let mut admitted_at: Vec<std::time::Instant> = Vec::new();
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_millis(250) {
            if limiter.check("burst", limit, window).allowed {
                admitted_at.push(std::time::Instant::now());
            }
            thread::sleep(Duration::from_millis(5));
        }

        for (i, t) in admitted_at.iter().enumerate() {
            let in_window = admitted_at[..i]
                .iter()
                .filter(|&&p| t.duration_since(p) < window)
                .count();
            assert!(
                in_window < limit as usize,
                "admission {i} exceeds limit within one window"
            );
        }
    }

    #[test]
    fn identifiers_are_independent() {
        let limiter = SlidingWindowLimiter::new();
        let window = Duration::from_secs(1);

        assert!(limiter.check("global:a", 1, window).allowed);
        assert!(!limiter.check("global:a", 1, window).allowed);
        // A different client is unaffected
        assert!(limiter.check("global:b", 1, window).allowed);
        // A different scope for the same client is unaffected
        assert!(limiter.check("search:a", 1, window).allowed);
    }

    #[test]
    fn reset_at_tracks_oldest_admission() {
        let limiter = SlidingWindowLimiter::new();
        let before = now_millis();
        let decision = limiter.check("id", 5, Duration::from_millis(500));
        assert!(decision.allowed);
        assert!(decision.reset_at >= before + 500);
        assert!(decision.reset_at <= now_millis() + 500);
    }

    #[test]
    fn sweep_drops_only_drained_identifiers() {
        let limiter = SlidingWindowLimiter::new();
        limiter.check("fast", 5, Duration::from_millis(1));
        limiter.check("slow", 5, Duration::from_secs(60));
        assert_eq!(limiter.tracked_identifiers(), 2);

        thread::sleep(Duration::from_millis(5));
        limiter.sweep();

        assert_eq!(limiter.tracked_identifiers(), 1);
    }

    #[tokio::test]
    async fn sweep_task_prunes_idle_identifiers() {
        let limiter = Arc::new(SlidingWindowLimiter::new());
        limiter.check("transient", 1, Duration::from_millis(1));

        spawn_sweep_task(Arc::clone(&limiter), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(limiter.tracked_identifiers(), 0);
    }
}
