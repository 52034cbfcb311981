//! Recommendation pipeline
//!
//! Resolves an inbound request end-to-end: geocode the location,
//! expand the occasion into search queries, run the orchestrated
//! fan-out, enrich the top venues, and (when configured) ask the
//! inference provider to rank them. Everything past geocoding
//! degrades gracefully: enrichment and ranking failures fall back to
//! the merged order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PipelineConfig;
use crate::models::{GeoPoint, RankedVenue, VenueCandidate};
use crate::orchestrator::SearchOrchestrator;
use crate::provider::{InferenceClient, NominatimClient, WikipediaEnricher};
use crate::{Error, Result};

/// Inbound recommendation request.
#[derive(Debug, Clone, Deserialize)]
pub struct RecommendRequest {
    /// What the user is planning (e.g. "anniversary dinner")
    pub occasion: String,
    /// Free-form location string, geocoded when coordinates are absent
    #[serde(default)]
    pub location: Option<String>,
    /// Explicit coordinates, taking precedence over `location`
    #[serde(default)]
    pub coordinates: Option<GeoPoint>,
    /// Explicit search queries; when absent they are expanded from
    /// the occasion
    #[serde(default)]
    pub queries: Option<Vec<String>>,
    /// Search radius in meters
    #[serde(default)]
    pub radius_m: Option<u32>,
}

/// Recommendation response.
#[derive(Debug, Clone, Serialize)]
pub struct RecommendResponse {
    /// Ranked (or merged-order) venues; empty is a normal outcome
    pub venues: Vec<RankedVenue>,
    /// Queries the orchestrator actually dispatched
    pub used_queries: Vec<String>,
    /// Where the search was centered
    pub center: GeoPoint,
    /// When this response was produced
    pub generated_at: DateTime<Utc>,
}

/// The composition of providers behind the pipeline.
pub struct RecommendationService {
    geocoder: Arc<NominatimClient>,
    orchestrator: SearchOrchestrator,
    enricher: Option<Arc<WikipediaEnricher>>,
    inference: Option<Arc<InferenceClient>>,
    config: PipelineConfig,
}

impl RecommendationService {
    /// Create a new service.
    #[must_use]
    pub fn new(
        geocoder: Arc<NominatimClient>,
        orchestrator: SearchOrchestrator,
        enricher: Option<Arc<WikipediaEnricher>>,
        inference: Option<Arc<InferenceClient>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            geocoder,
            orchestrator,
            enricher,
            inference,
            config,
        }
    }

    /// Handle one recommendation request.
    ///
    /// # Errors
    ///
    /// `Error::InvalidRequest` when neither coordinates nor a location
    /// string is supplied; `Error::LocationNotFound` when geocoding
    /// resolves nothing. Provider failures past that point are
    /// absorbed and reflected as fewer (or unranked) venues.
    pub async fn recommend(&self, request: RecommendRequest) -> Result<RecommendResponse> {
        let occasion = request.occasion.trim();
        if occasion.is_empty() {
            return Err(Error::InvalidRequest("occasion must not be empty".into()));
        }

        let center = self.resolve_center(&request).await?;
        let queries = self.expand_queries(&request, occasion);
        let radius_m = request.radius_m.unwrap_or(self.config.default_radius_m);

        let outcome = self.orchestrator.search(&queries, center, radius_m).await;

        let mut venues = outcome.venues;
        self.enrich(&mut venues).await;

        let ranked = self.rank(occasion, venues).await;

        Ok(RecommendResponse {
            venues: ranked,
            used_queries: outcome.used_queries,
            center,
            generated_at: Utc::now(),
        })
    }

    async fn resolve_center(&self, request: &RecommendRequest) -> Result<GeoPoint> {
        if let Some(coordinates) = request.coordinates {
            return Ok(coordinates);
        }
        match request.location.as_deref().map(str::trim) {
            Some(location) if !location.is_empty() => self.geocoder.geocode(location).await,
            _ => Err(Error::InvalidRequest(
                "either coordinates or a location string is required".into(),
            )),
        }
    }

    /// Queries from the request, or the configured templates applied
    /// to the occasion.
    fn expand_queries(&self, request: &RecommendRequest, occasion: &str) -> Vec<String> {
        if let Some(queries) = &request.queries {
            let explicit: Vec<String> = queries
                .iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .collect();
            if !explicit.is_empty() {
                return explicit;
            }
        }
        self.config
            .query_templates
            .iter()
            .map(|t| t.replace("{occasion}", occasion))
            .collect()
    }

    /// Best-effort summaries for the top venues. Failures are logged
    /// and skipped; the venue set is never reduced here.
    async fn enrich(&self, venues: &mut [VenueCandidate]) {
        let Some(enricher) = &self.enricher else {
            return;
        };

        let top = venues.len().min(self.config.enrich_top);
        let summaries = join_all(
            venues[..top]
                .iter()
                .map(|v| enricher.summarize(&v.name)),
        )
        .await;

        for (venue, summary) in venues[..top].iter_mut().zip(summaries) {
            match summary {
                Ok(Some(text)) => venue.summary = Some(text),
                Ok(None) => {}
                Err(e) => {
                    debug!(venue = %venue.name, error = %e, "Enrichment skipped");
                }
            }
        }
    }

    /// Rank through the inference provider when configured; fall back
    /// to merged order on any failure.
    async fn rank(
        &self,
        occasion: &str,
        venues: Vec<VenueCandidate>,
    ) -> Vec<RankedVenue> {
        let Some(inference) = &self.inference else {
            return venues.into_iter().map(RankedVenue::unranked).collect();
        };

        match inference.rank(occasion, &venues).await {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!(error = %e, "Ranking failed, returning merged order");
                venues.into_iter().map(RankedVenue::unranked).collect()
            }
        }
    }
}
