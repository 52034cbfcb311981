//! Per-provider health tracking with latency metrics

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

/// Consecutive failures before a provider is marked unhealthy
const UNHEALTHY_THRESHOLD: u64 = 3;

/// Latency samples kept for percentile calculation
const SAMPLE_CAPACITY: usize = 1000;

/// Tracks success/failure counts and request latencies for one provider.
pub struct HealthTracker {
    name: String,
    healthy: AtomicBool,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    consecutive_failures: AtomicU64,
    last_success: AtomicU64,
    last_failure: AtomicU64,
    latencies: RwLock<Vec<u64>>,
}

impl HealthTracker {
    /// Create a new tracker for `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            healthy: AtomicBool::new(true),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            last_success: AtomicU64::new(0),
            last_failure: AtomicU64::new(0),
            latencies: RwLock::new(Vec::new()),
        }
    }

    fn epoch_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Record a successful request and its latency.
    pub fn record_success(&self, latency: Duration) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.last_success.store(Self::epoch_millis(), Ordering::Relaxed);

        let mut latencies = self.latencies.write();
        if latencies.len() >= SAMPLE_CAPACITY {
            latencies.remove(0);
        }
        latencies.push(latency.as_millis() as u64);
        drop(latencies);

        if !self.healthy.swap(true, Ordering::Relaxed) {
            info!(provider = %self.name, "Provider recovered");
        }
    }

    /// Record a failed request.
    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        let consecutive = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        self.last_failure.store(Self::epoch_millis(), Ordering::Relaxed);

        if consecutive >= UNHEALTHY_THRESHOLD && self.healthy.swap(false, Ordering::Relaxed) {
            warn!(
                provider = %self.name,
                consecutive_failures = consecutive,
                "Provider marked unhealthy"
            );
        }
    }

    /// Whether the provider is currently considered healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Snapshot of current metrics.
    #[must_use]
    pub fn metrics(&self) -> HealthMetrics {
        let latencies = self.latencies.read();
        let mut sorted = latencies.clone();
        drop(latencies);
        sorted.sort_unstable();

        let percentile = |p: f64| -> u64 {
            if sorted.is_empty() {
                return 0;
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
            sorted[idx.min(sorted.len() - 1)]
        };

        HealthMetrics {
            name: self.name.clone(),
            healthy: self.is_healthy(),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_success_ms: self.last_success.load(Ordering::Relaxed),
            last_failure_ms: self.last_failure.load(Ordering::Relaxed),
            latency_p50_ms: percentile(0.50),
            latency_p95_ms: percentile(0.95),
        }
    }
}

/// Serializable health snapshot for the stats endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    /// Provider name
    pub name: String,
    /// Whether the provider is currently healthy
    pub healthy: bool,
    /// Total successful requests
    pub success_count: u64,
    /// Total failed requests
    pub failure_count: u64,
    /// Failures since the last success
    pub consecutive_failures: u64,
    /// Last success, millis since epoch (0 = never)
    pub last_success_ms: u64,
    /// Last failure, millis since epoch (0 = never)
    pub last_failure_ms: u64,
    /// Median request latency
    pub latency_p50_ms: u64,
    /// 95th percentile request latency
    pub latency_p95_ms: u64,
}
