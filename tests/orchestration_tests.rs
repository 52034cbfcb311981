//! End-to-end orchestration tests over mock providers
//!
//! Covers the full pass (dispatch, collect, dedup, filter, truncate)
//! plus the failsafe composition the real adapters wrap around their
//! network calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use venuescout::Error;
use venuescout::cache::ExpiringCache;
use venuescout::config::{OrchestratorConfig, RetryConfig};
use venuescout::failsafe::Failsafe;
use venuescout::models::{GeoPoint, VenueCandidate, identity_key};
use venuescout::orchestrator::SearchOrchestrator;
use venuescout::provider::{DispatchPolicy, PlaceProvider};

fn venue(name: &str, lat: f64, rating: Option<f32>) -> VenueCandidate {
    let location = GeoPoint::new(lat, -73.99);
    VenueCandidate {
        identity: identity_key(location, name),
        name: name.to_string(),
        address: format!("{name} Street"),
        location,
        rating,
        review_count: 0,
        photo_url: None,
        categories: vec!["restaurant".to_string()],
        source: "mock".to_string(),
        summary: None,
    }
}

fn center() -> GeoPoint {
    GeoPoint::new(40.7128, -74.006)
}

/// A provider whose per-query results are scripted, with an optional
/// number of leading failures.
struct ScriptedProvider {
    name: &'static str,
    results: Vec<Vec<VenueCandidate>>,
    calls: AtomicU32,
    fail_first: u32,
}

impl ScriptedProvider {
    fn new(name: &'static str, results: Vec<Vec<VenueCandidate>>) -> Arc<Self> {
        Arc::new(Self {
            name,
            results,
            calls: AtomicU32::new(0),
            fail_first: 0,
        })
    }
}

#[async_trait]
impl PlaceProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy::Parallel
    }

    async fn search(
        &self,
        _query: &str,
        _center: GeoPoint,
        _radius_m: u32,
        _limit: usize,
    ) -> venuescout::Result<Vec<VenueCandidate>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(Error::ProviderStatus {
                provider: "scripted".to_string(),
                status: 503,
            });
        }
        Ok(self
            .results
            .get(call as usize % self.results.len().max(1))
            .cloned()
            .unwrap_or_default())
    }
}

#[tokio::test]
async fn test_cross_provider_duplicate_merges_to_one() {
    // The same physical place from two providers shares an identity
    // key (rounded coordinates + normalized name) and appears once.
    let mut from_b = venue("Blue Note", 40.73079, None);
    from_b.source = "provider-b".to_string();
    from_b.rating = Some(8.9);
    let from_a = venue("Blue Note", 40.73082, Some(4.4));

    let a = ScriptedProvider::new("a", vec![vec![from_a.clone()]]);
    let b = ScriptedProvider::new("b", vec![vec![from_b]]);

    let orchestrator = SearchOrchestrator::new(
        vec![a, b],
        OrchestratorConfig {
            quality_floor: 1,
            ..OrchestratorConfig::default()
        },
    );

    let outcome = orchestrator
        .search(&["jazz club".to_string()], center(), 1500)
        .await;

    assert_eq!(outcome.venues.len(), 1);
    // First-seen wins: provider "a" is listed first
    assert_eq!(outcome.venues[0].source, "mock");
}

#[tokio::test]
async fn test_all_adapters_down_returns_empty_result() {
    let broken = Arc::new(ScriptedProvider {
        name: "broken",
        results: Vec::new(),
        calls: AtomicU32::new(0),
        fail_first: u32::MAX,
    });

    let orchestrator = SearchOrchestrator::new(vec![broken], OrchestratorConfig::default());
    let outcome = orchestrator
        .search(
            &["dinner".to_string(), "drinks".to_string()],
            center(),
            1000,
        )
        .await;

    assert!(outcome.venues.is_empty());
    assert_eq!(outcome.used_queries.len(), 2);
}

#[tokio::test]
async fn test_merged_set_is_filtered_and_truncated() {
    // 20 rated venues and 5 bare ones across two queries: the filter
    // keeps the rated set, truncation caps it at max_results.
    let rated: Vec<VenueCandidate> = (0..20)
        .map(|i| venue(&format!("Rated {i}"), 40.0 + f64::from(i) * 0.01, Some(4.0)))
        .collect();
    let bare: Vec<VenueCandidate> = (0..5)
        .map(|i| venue(&format!("Bare {i}"), 41.0 + f64::from(i) * 0.01, None))
        .collect();

    let provider = ScriptedProvider::new("p", vec![rated, bare]);
    let orchestrator = SearchOrchestrator::new(
        vec![provider],
        OrchestratorConfig {
            max_results: 15,
            ..OrchestratorConfig::default()
        },
    );

    let outcome = orchestrator
        .search(
            &["dinner".to_string(), "drinks".to_string()],
            center(),
            1000,
        )
        .await;

    assert_eq!(outcome.venues.len(), 15);
    assert!(outcome.venues.iter().all(VenueCandidate::has_quality_signal));
}

#[tokio::test]
async fn test_failsafe_retries_transient_failures_transparently() {
    // An adapter call that fails twice with 503 then succeeds is one
    // successful logical call from the orchestration layer's view.
    let retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        max_jitter: Duration::ZERO,
        ..RetryConfig::default()
    };
    let failsafe = Failsafe::new("flaky", &retry, None);

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let result = failsafe
        .run("flaky.search", move || {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::ProviderStatus {
                        provider: "flaky".to_string(),
                        status: 503,
                    })
                } else {
                    Ok(vec![venue("Survivor", 40.5, Some(4.0))])
                }
            }
        })
        .await;

    assert_eq!(result.unwrap().len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(failsafe.health.is_healthy());
}

#[test]
fn test_cache_ttl_scenario() {
    // set with ttl=100ms: present at t=50ms, absent at t=150ms
    let cache = ExpiringCache::new("scenario", 16);
    cache.set(
        "loc:nyc",
        GeoPoint::new(40.71, -74.0),
        Duration::from_millis(100),
    );

    std::thread::sleep(Duration::from_millis(50));
    assert!(cache.get("loc:nyc").is_some());

    std::thread::sleep(Duration::from_millis(100));
    assert!(cache.get("loc:nyc").is_none());
}

#[test]
fn test_cache_serves_fanout_results_across_passes() {
    // A second identical search pass would hit the places cache: the
    // adapters key on normalized query + rounded center + radius bucket.
    let cache: ExpiringCache<Vec<VenueCandidate>> = ExpiringCache::new("places", 64);
    let key = venuescout::provider::place_cache_key("nominatim", "Dinner", center(), 1800);

    cache.set(key.clone(), vec![venue("Cached Spot", 40.6, Some(4.2))], Duration::from_secs(60));

    let same_key = venuescout::provider::place_cache_key("nominatim", "dinner ", center(), 2000);
    assert_eq!(key, same_key);
    assert_eq!(cache.get(&same_key).unwrap().len(), 1);
    assert_eq!(cache.stats().hits, 1);
}
