//! Foursquare Places adapter
//!
//! Keyed provider with a generous quota: queries run in parallel, and
//! a governor pacer keeps sustained throughput below the contractual
//! requests-per-second ceiling.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{DispatchPolicy, PlaceProvider, place_cache_key};
use crate::cache::CacheDomain;
use crate::config::FoursquareConfig;
use crate::failsafe::Failsafe;
use crate::models::{GeoPoint, VenueCandidate, identity_key};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<FsqPlace>,
}

#[derive(Debug, Deserialize)]
struct FsqPlace {
    #[serde(default)]
    name: String,
    #[serde(default)]
    geocodes: Geocodes,
    #[serde(default)]
    location: FsqLocation,
    #[serde(default)]
    categories: Vec<FsqCategory>,
    #[serde(default)]
    rating: Option<f32>,
    #[serde(default)]
    stats: Option<FsqStats>,
    #[serde(default)]
    photos: Vec<FsqPhoto>,
}

#[derive(Debug, Deserialize, Default)]
struct Geocodes {
    main: Option<LatLng>,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize, Default)]
struct FsqLocation {
    #[serde(default)]
    formatted_address: String,
}

#[derive(Debug, Deserialize)]
struct FsqCategory {
    name: String,
}

#[derive(Debug, Deserialize)]
struct FsqStats {
    #[serde(default)]
    total_ratings: u32,
}

#[derive(Debug, Deserialize)]
struct FsqPhoto {
    prefix: String,
    suffix: String,
}

impl FsqPlace {
    fn to_candidate(&self) -> Option<VenueCandidate> {
        let main = self.geocodes.main.as_ref()?;
        if self.name.is_empty() {
            return None;
        }
        let location = GeoPoint::new(main.latitude, main.longitude);
        let photo_url = self
            .photos
            .first()
            .map(|p| format!("{}original{}", p.prefix, p.suffix));

        Some(VenueCandidate {
            identity: identity_key(location, &self.name),
            name: self.name.clone(),
            address: self.location.formatted_address.clone(),
            location,
            rating: self.rating,
            review_count: self.stats.as_ref().map_or(0, |s| s.total_ratings),
            photo_url,
            categories: self.categories.iter().map(|c| c.name.clone()).collect(),
            source: "foursquare".to_string(),
            summary: None,
        })
    }
}

/// Foursquare Places search provider.
pub struct FoursquareProvider {
    http: Client,
    base_url: String,
    api_key: String,
    failsafe: Failsafe,
    places_cache: CacheDomain<Vec<VenueCandidate>>,
}

impl FoursquareProvider {
    /// Fields requested from the API; ratings, stats and photos feed
    /// the quality filter downstream.
    const FIELDS: &'static str = "name,geocodes,location,categories,rating,stats,photos";

    /// Create a new provider.
    pub fn new(
        config: &FoursquareConfig,
        failsafe: Failsafe,
        places_cache: CacheDomain<Vec<VenueCandidate>>,
    ) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            failsafe,
            places_cache,
        })
    }

    /// Health tracker handle for the stats endpoint.
    #[must_use]
    pub fn health(&self) -> std::sync::Arc<crate::failsafe::HealthTracker> {
        std::sync::Arc::clone(&self.failsafe.health)
    }

    async fn fetch(&self, params: Vec<(&'static str, String)>) -> Result<SearchResponse> {
        let url = format!("{}/places/search", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("Authorization", &self.api_key)
            .query(&params)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::ProviderStatus {
                provider: "foursquare".to_string(),
                status: status.as_u16(),
            });
        }
        response.json().await.map_err(|e| Error::MalformedResponse {
            provider: "foursquare".to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl PlaceProvider for FoursquareProvider {
    fn name(&self) -> &'static str {
        "foursquare"
    }

    fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy::Parallel
    }

    async fn search(
        &self,
        query: &str,
        center: GeoPoint,
        radius_m: u32,
        limit: usize,
    ) -> Result<Vec<VenueCandidate>> {
        let key = place_cache_key(self.name(), query, center, radius_m);
        if let Some(venues) = self.places_cache.get(&key) {
            return Ok(venues);
        }

        let response = self
            .failsafe
            .run("foursquare.search", || {
                self.fetch(vec![
                    ("query", query.to_string()),
                    ("ll", format!("{},{}", center.lat, center.lng)),
                    ("radius", radius_m.to_string()),
                    ("limit", limit.to_string()),
                    ("fields", Self::FIELDS.to_string()),
                ])
            })
            .await?;

        let venues: Vec<VenueCandidate> = response
            .results
            .iter()
            .filter_map(FsqPlace::to_candidate)
            .collect();
        debug!(query, count = venues.len(), "Foursquare search complete");

        self.places_cache.set(key, venues.clone());
        Ok(venues)
    }
}
