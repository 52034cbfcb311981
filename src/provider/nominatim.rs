//! Nominatim adapter: geocoding and public place search
//!
//! Nominatim is a no-key public service; its usage policy caps
//! clients at roughly one request per second, so the orchestrator
//! dispatches queries to it sequentially with an inter-query delay
//! and every request carries an identifying User-Agent.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{DispatchPolicy, PlaceProvider, place_cache_key};
use crate::cache::CacheDomain;
use crate::config::NominatimConfig;
use crate::failsafe::Failsafe;
use crate::models::{GeoPoint, VenueCandidate, identity_key};
use crate::{Error, Result};

/// One result row from the Nominatim search endpoint (jsonv2 format).
#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    name: String,
    display_name: String,
    #[serde(default)]
    category: Option<String>,
    #[serde(rename = "type", default)]
    place_type: Option<String>,
}

impl NominatimPlace {
    fn location(&self) -> Option<GeoPoint> {
        let lat = self.lat.parse().ok()?;
        let lng = self.lon.parse().ok()?;
        Some(GeoPoint::new(lat, lng))
    }

    fn to_candidate(&self) -> Option<VenueCandidate> {
        let location = self.location()?;
        let name = if self.name.is_empty() {
            self.display_name.split(',').next()?.trim().to_string()
        } else {
            self.name.clone()
        };
        if name.is_empty() {
            return None;
        }

        let categories = [self.category.as_deref(), self.place_type.as_deref()]
            .into_iter()
            .flatten()
            .map(str::to_string)
            .collect();

        Some(VenueCandidate {
            identity: identity_key(location, &name),
            name,
            address: self.display_name.clone(),
            location,
            // Nominatim carries no rating/photo/review signals
            rating: None,
            review_count: 0,
            photo_url: None,
            categories,
            source: "nominatim".to_string(),
            summary: None,
        })
    }
}

/// Client for the Nominatim geocoding and search API.
pub struct NominatimClient {
    http: Client,
    base_url: String,
    inter_query_delay: Duration,
    failsafe: Failsafe,
    geocode_cache: CacheDomain<GeoPoint>,
    places_cache: CacheDomain<Vec<VenueCandidate>>,
}

impl NominatimClient {
    /// Create a new client.
    pub fn new(
        config: &NominatimConfig,
        failsafe: Failsafe,
        geocode_cache: CacheDomain<GeoPoint>,
        places_cache: CacheDomain<Vec<VenueCandidate>>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            inter_query_delay: config.inter_query_delay,
            failsafe,
            geocode_cache,
            places_cache,
        })
    }

    /// Health tracker handle for the stats endpoint.
    #[must_use]
    pub fn health(&self) -> std::sync::Arc<crate::failsafe::HealthTracker> {
        std::sync::Arc::clone(&self.failsafe.health)
    }

    /// Resolve a free-form location string to coordinates.
    ///
    /// Results are near-immutable, so hits come from the long-TTL
    /// geocode cache; a cache miss falls through to the provider.
    ///
    /// # Errors
    ///
    /// `Error::LocationNotFound` when the provider returns no match;
    /// provider/transport errors after retries are exhausted.
    pub async fn geocode(&self, location: &str) -> Result<GeoPoint> {
        let key = format!("geo:{}", location.trim().to_lowercase());
        if let Some(point) = self.geocode_cache.get(&key) {
            return Ok(point);
        }

        let rows = self
            .failsafe
            .run("nominatim.geocode", || {
                self.fetch(vec![
                    ("q", location.to_string()),
                    ("format", "jsonv2".to_string()),
                    ("limit", "1".to_string()),
                ])
            })
            .await?;

        let point = rows
            .first()
            .and_then(NominatimPlace::location)
            .ok_or_else(|| Error::LocationNotFound(location.to_string()))?;

        self.geocode_cache.set(key, point);
        Ok(point)
    }

    async fn fetch(&self, params: Vec<(&'static str, String)>) -> Result<Vec<NominatimPlace>> {
        let url = format!("{}/search", self.base_url);
        let response = self.http.get(&url).query(&params).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::ProviderStatus {
                provider: "nominatim".to_string(),
                status: status.as_u16(),
            });
        }
        response.json().await.map_err(|e| Error::MalformedResponse {
            provider: "nominatim".to_string(),
            message: e.to_string(),
        })
    }

    /// Bounding box around `center` with half-width `radius_m`, in
    /// Nominatim's `left,top,right,bottom` order.
    fn viewbox(center: GeoPoint, radius_m: u32) -> String {
        let d_lat = f64::from(radius_m) / 111_320.0;
        let d_lng = d_lat / center.lat.to_radians().cos().abs().max(0.01);
        format!(
            "{},{},{},{}",
            center.lng - d_lng,
            center.lat + d_lat,
            center.lng + d_lng,
            center.lat - d_lat
        )
    }
}

#[async_trait]
impl PlaceProvider for NominatimClient {
    fn name(&self) -> &'static str {
        "nominatim"
    }

    fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy::Throttled {
            inter_query_delay: self.inter_query_delay,
        }
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

        let viewbox = Self::viewbox(center, radius_m);
        let rows = self
            .failsafe
            .run("nominatim.search", || {
                self.fetch(vec![
                    ("q", query.to_string()),
                    ("format", "jsonv2".to_string()),
                    ("limit", limit.to_string()),
                    ("viewbox", viewbox.clone()),
                    ("bounded", "1".to_string()),
                ])
            })
            .await?;

        let venues: Vec<VenueCandidate> =
            rows.iter().filter_map(NominatimPlace::to_candidate).collect();
        debug!(query, count = venues.len(), "Nominatim search complete");

        self.places_cache.set(key, venues.clone());
        Ok(venues)
    }
}
