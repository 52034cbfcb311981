//! Search orchestration: fan-out, merge, dedup
//!
//! One orchestration pass runs Dispatch -> Collect -> Deduplicate ->
//! Filter -> Truncate. Provider and query failures are absorbed here:
//! a query that fails contributes zero results, and a pass where every
//! query fails returns an empty set, never an error. "No venues found"
//! is a normal, displayable outcome.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::models::{GeoPoint, VenueCandidate};
use crate::provider::{DispatchPolicy, PlaceProvider};

/// Result of one orchestration pass.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    /// Merged, deduplicated, filtered, truncated venue set
    pub venues: Vec<VenueCandidate>,
    /// Queries that were actually dispatched
    pub used_queries: Vec<String>,
}

/// Fans search queries out to the configured providers and merges the
/// results into a single consistent venue set.
pub struct SearchOrchestrator {
    providers: Vec<Arc<dyn PlaceProvider>>,
    config: OrchestratorConfig,
}

impl SearchOrchestrator {
    /// Create a new orchestrator over `providers`.
    #[must_use]
    pub fn new(providers: Vec<Arc<dyn PlaceProvider>>, config: OrchestratorConfig) -> Self {
        Self { providers, config }
    }

    /// Run one orchestration pass.
    pub async fn search(
        &self,
        queries: &[String],
        center: GeoPoint,
        radius_m: u32,
    ) -> SearchOutcome {
        let pass_id = Uuid::new_v4();
        let used_queries: Vec<String> = queries
            .iter()
            .filter(|q| !q.trim().is_empty())
            .take(self.config.max_queries)
            .cloned()
            .collect();

        if used_queries.is_empty() || self.providers.is_empty() {
            return SearchOutcome {
                venues: Vec::new(),
                used_queries,
            };
        }

        // Dispatch + Collect, one batch per provider, providers in parallel
        let batches = join_all(self.providers.iter().map(|provider| {
            self.run_provider(Arc::clone(provider), &used_queries, center, radius_m)
        }))
        .await;

        // Deduplicate: first-seen-wins on the stable identity key
        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for batch in batches {
            for venue in batch {
                if seen.insert(venue.identity.clone()) {
                    merged.push(venue);
                }
            }
        }

        let merged = self.apply_quality_filter(merged);

        // Truncate to bound downstream ranking cost
        let mut venues = merged;
        venues.truncate(self.config.max_results);

        info!(
            %pass_id,
            queries = used_queries.len(),
            venues = venues.len(),
            "Orchestration pass complete"
        );

        SearchOutcome {
            venues,
            used_queries,
        }
    }

    /// Run every query against one provider, honoring its dispatch
    /// policy. Failures collapse to zero results for that query.
    async fn run_provider(
        &self,
        provider: Arc<dyn PlaceProvider>,
        queries: &[String],
        center: GeoPoint,
        radius_m: u32,
    ) -> Vec<VenueCandidate> {
        let limit = self.config.per_query_limit;

        match provider.dispatch_policy() {
            DispatchPolicy::Parallel => {
                let results = join_all(queries.iter().map(|query| {
                    let provider = Arc::clone(&provider);
                    async move {
                        Self::run_query(provider.as_ref(), query, center, radius_m, limit).await
                    }
                }))
                .await;
                results.into_iter().flatten().collect()
            }
            DispatchPolicy::Throttled { inter_query_delay } => {
                let mut collected = Vec::new();
                for (i, query) in queries.iter().enumerate() {
                    if i > 0 {
                        tokio::time::sleep(inter_query_delay).await;
                    }
                    collected.extend(
                        Self::run_query(provider.as_ref(), query, center, radius_m, limit).await,
                    );
                }
                collected
            }
        }
    }

    /// One provider call. Errors are absorbed: one bad query must
    /// never abort the others.
    async fn run_query(
        provider: &dyn PlaceProvider,
        query: &str,
        center: GeoPoint,
        radius_m: u32,
        limit: usize,
    ) -> Vec<VenueCandidate> {
        match provider.search(query, center, radius_m, limit).await {
            Ok(venues) => venues,
            Err(e) => {
                warn!(
                    provider = provider.name(),
                    query,
                    error = %e,
                    "Query failed, contributing zero results"
                );
                Vec::new()
            }
        }
    }

    /// Keep candidates with at least one quality signal, unless doing
    /// so would leave fewer than the configured floor; in that case
    /// the unfiltered set is used so the pass still returns something
    /// reasonable.
    fn apply_quality_filter(&self, merged: Vec<VenueCandidate>) -> Vec<VenueCandidate> {
        let kept: Vec<VenueCandidate> = merged
            .iter()
            .filter(|v| v.has_quality_signal())
            .cloned()
            .collect();

        if kept.len() >= self.config.quality_floor {
            kept
        } else {
            debug!(
                kept = kept.len(),
                floor = self.config.quality_floor,
                total = merged.len(),
                "Quality filter skipped, too few candidates would remain"
            );
            merged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use crate::models::identity_key;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn venue(name: &str, lat: f64, rating: Option<f32>) -> VenueCandidate {
        let location = GeoPoint::new(lat, -74.0);
        VenueCandidate {
            identity: identity_key(location, name),
            name: name.to_string(),
            address: String::new(),
            location,
            rating,
            review_count: 0,
            photo_url: None,
            categories: Vec::new(),
            source: "mock".to_string(),
            summary: None,
        }
    }

    /// Mock provider returning the same canned batch for every query.
    struct StaticProvider {
        name: &'static str,
        batch: Vec<VenueCandidate>,
        policy: DispatchPolicy,
        calls: AtomicU32,
    }

    impl StaticProvider {
        fn parallel(name: &'static str, batch: Vec<VenueCandidate>) -> Arc<Self> {
            Arc::new(Self {
                name,
                batch,
                policy: DispatchPolicy::Parallel,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl PlaceProvider for StaticProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        fn dispatch_policy(&self) -> DispatchPolicy {
            self.policy
        }

        async fn search(
            &self,
            _query: &str,
            _center: GeoPoint,
            _radius_m: u32,
            _limit: usize,
        ) -> Result<Vec<VenueCandidate>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.batch.clone())
        }
    }

    /// Mock provider that always fails.
    struct FailingProvider;

    #[async_trait]
    impl PlaceProvider for FailingProvider {
        fn name(&self) -> &'static str {
            "failing"
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
        ) -> Result<Vec<VenueCandidate>> {
            Err(crate::Error::ProviderStatus {
                provider: "failing".to_string(),
                status: 503,
            })
        }
    }

    fn center() -> GeoPoint {
        GeoPoint::new(40.7128, -74.006)
    }

    fn queries(qs: &[&str]) -> Vec<String> {
        qs.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn overlapping_identity_appears_exactly_once() {
        let shared = venue("Common Spot", 40.1, Some(4.5));
        let a = StaticProvider::parallel(
            "a",
            vec![shared.clone(), venue("Only A", 40.2, Some(4.0))],
        );
        let b = StaticProvider::parallel(
            "b",
            vec![shared.clone(), venue("Only B", 40.3, Some(3.9))],
        );

        let orchestrator =
            SearchOrchestrator::new(vec![a, b], OrchestratorConfig::default());
        let outcome = orchestrator
            .search(&queries(&["dinner"]), center(), 1000)
            .await;

        let count = outcome
            .venues
            .iter()
            .filter(|v| v.identity == shared.identity)
            .count();
        assert_eq!(count, 1);
        assert_eq!(outcome.venues.len(), 3);
    }

    #[tokio::test]
    async fn first_seen_wins_across_queries() {
        let from_a = venue("Common Spot", 40.1, Some(4.5));
        let mut from_b = from_a.clone();
        from_b.source = "b".to_string();

        let a = StaticProvider::parallel("a", vec![from_a]);
        let b = StaticProvider::parallel("b", vec![from_b]);

        let orchestrator =
            SearchOrchestrator::new(vec![a, b], OrchestratorConfig::default());
        let outcome = orchestrator
            .search(&queries(&["dinner"]), center(), 1000)
            .await;

        assert_eq!(outcome.venues.len(), 1);
        // Provider "a" is first in the provider list, so its copy wins
        assert_eq!(outcome.venues[0].source, "mock");
    }

    #[tokio::test]
    async fn every_query_failing_yields_empty_not_error() {
        let orchestrator = SearchOrchestrator::new(
            vec![Arc::new(FailingProvider)],
            OrchestratorConfig::default(),
        );
        let outcome = orchestrator
            .search(&queries(&["dinner", "drinks"]), center(), 1000)
            .await;

        assert!(outcome.venues.is_empty());
        assert_eq!(outcome.used_queries.len(), 2);
    }

    #[tokio::test]
    async fn one_failing_provider_does_not_abort_the_pass() {
        let good = StaticProvider::parallel("good", vec![venue("Kept", 40.1, Some(4.0))]);
        let orchestrator = SearchOrchestrator::new(
            vec![Arc::new(FailingProvider), good],
            OrchestratorConfig::default(),
        );
        let outcome = orchestrator
            .search(&queries(&["dinner"]), center(), 1000)
            .await;

        assert_eq!(outcome.venues.len(), 1);
        assert_eq!(outcome.venues[0].name, "Kept");
    }

    #[tokio::test]
    async fn quality_filter_drops_signalless_candidates() {
        let batch = vec![
            venue("Rated 1", 40.1, Some(4.0)),
            venue("Rated 2", 40.2, Some(4.1)),
            venue("Rated 3", 40.3, Some(4.2)),
            venue("Bare", 40.4, None),
        ];
        let provider = StaticProvider::parallel("p", batch);

        let orchestrator =
            SearchOrchestrator::new(vec![provider], OrchestratorConfig::default());
        let outcome = orchestrator
            .search(&queries(&["dinner"]), center(), 1000)
            .await;

        assert_eq!(outcome.venues.len(), 3);
        assert!(outcome.venues.iter().all(VenueCandidate::has_quality_signal));
    }

    #[tokio::test]
    async fn quality_filter_is_skipped_below_floor() {
        // Only one candidate has a signal; the floor is 3, so the
        // filter would keep too little and is skipped entirely
        let batch = vec![
            venue("Rated", 40.1, Some(4.0)),
            venue("Bare 1", 40.2, None),
            venue("Bare 2", 40.3, None),
        ];
        let provider = StaticProvider::parallel("p", batch);

        let orchestrator =
            SearchOrchestrator::new(vec![provider], OrchestratorConfig::default());
        let outcome = orchestrator
            .search(&queries(&["dinner"]), center(), 1000)
            .await;

        assert_eq!(outcome.venues.len(), 3);
    }

    #[tokio::test]
    async fn result_set_is_truncated_to_max_results() {
        let batch: Vec<VenueCandidate> = (0..30)
            .map(|i| venue(&format!("Venue {i}"), 40.0 + f64::from(i) * 0.01, Some(4.0)))
            .collect();
        let provider = StaticProvider::parallel("p", batch);

        let config = OrchestratorConfig {
            max_results: 15,
            ..OrchestratorConfig::default()
        };
        let orchestrator = SearchOrchestrator::new(vec![provider], config);
        let outcome = orchestrator
            .search(&queries(&["dinner"]), center(), 1000)
            .await;

        assert_eq!(outcome.venues.len(), 15);
    }

    #[tokio::test]
    async fn queries_are_capped_and_blanks_are_dropped() {
        let provider = StaticProvider::parallel("p", vec![venue("V", 40.1, Some(4.0))]);
        let calls = Arc::clone(&provider);

        let config = OrchestratorConfig {
            max_queries: 2,
            ..OrchestratorConfig::default()
        };
        let orchestrator = SearchOrchestrator::new(vec![provider], config);
        let outcome = orchestrator
            .search(
                &queries(&["dinner", "  ", "drinks", "brunch"]),
                center(),
                1000,
            )
            .await;

        assert_eq!(outcome.used_queries, vec!["dinner", "drinks"]);
        assert_eq!(calls.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn throttled_provider_spaces_queries() {
        let provider = Arc::new(StaticProvider {
            name: "slow",
            batch: vec![venue("V", 40.1, Some(4.0))],
            policy: DispatchPolicy::Throttled {
                inter_query_delay: Duration::from_millis(30),
            },
            calls: AtomicU32::new(0),
        });

        let orchestrator = SearchOrchestrator::new(
            vec![Arc::clone(&provider) as Arc<dyn PlaceProvider>],
            OrchestratorConfig::default(),
        );

        let start = std::time::Instant::now();
        orchestrator
            .search(&queries(&["a", "b", "c"]), center(), 1000)
            .await;

        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn no_queries_short_circuits() {
        let provider = StaticProvider::parallel("p", vec![venue("V", 40.1, Some(4.0))]);
        let calls = Arc::clone(&provider);

        let orchestrator =
            SearchOrchestrator::new(vec![provider], OrchestratorConfig::default());
        let outcome = orchestrator.search(&[], center(), 1000).await;

        assert!(outcome.venues.is_empty());
        assert_eq!(calls.calls.load(Ordering::SeqCst), 0);
    }
}
