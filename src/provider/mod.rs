//! Place data provider adapters
//!
//! One adapter per upstream source. Each adapter composes the
//! failsafe wrapper (pacing + retry + health) around its network call
//! and consults its cache domain before going upstream.

pub mod foursquare;
pub mod inference;
pub mod nominatim;
pub mod wikipedia;

pub use foursquare::FoursquareProvider;
pub use inference::InferenceClient;
pub use nominatim::NominatimClient;
pub use wikipedia::WikipediaEnricher;

use std::time::Duration;

use async_trait::async_trait;

use crate::Result;
use crate::models::{GeoPoint, VenueCandidate};

/// How the orchestrator may dispatch queries to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPolicy {
    /// Queries run concurrently; the provider's quota is generous
    Parallel,
    /// Queries run sequentially with a delay between them; the
    /// provider's usage policy mandates throttled access
    Throttled {
        /// Delay between consecutive queries
        inter_query_delay: Duration,
    },
}

/// A searchable place data source.
#[async_trait]
pub trait PlaceProvider: Send + Sync {
    /// Provider name, used in logs, candidate sources, and health metrics.
    fn name(&self) -> &'static str;

    /// How this provider wants queries dispatched.
    fn dispatch_policy(&self) -> DispatchPolicy;

    /// Search for venues matching `query` around `center`.
    async fn search(
        &self,
        query: &str,
        center: GeoPoint,
        radius_m: u32,
        limit: usize,
    ) -> Result<Vec<VenueCandidate>>;
}

/// Cache key for a place search: normalized query, rounded center,
/// bucketed radius. Normalization keeps near-identical requests on
/// one entry.
#[must_use]
pub fn place_cache_key(provider: &str, query: &str, center: GeoPoint, radius_m: u32) -> String {
    let radius_bucket = radius_m.div_ceil(500) * 500;
    format!(
        "{provider}:{}:{:.3},{:.3}:{radius_bucket}",
        query.trim().to_lowercase(),
        center.lat,
        center.lng
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_normalizes_query_and_buckets_radius() {
        let center = GeoPoint::new(40.7128, -74.006);
        let a = place_cache_key("nominatim", "  Sushi Bar ", center, 1800);
        let b = place_cache_key("nominatim", "sushi bar", center, 2000);
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_separates_providers() {
        let center = GeoPoint::new(40.7128, -74.006);
        let a = place_cache_key("nominatim", "sushi", center, 1000);
        let b = place_cache_key("foursquare", "sushi", center, 1000);
        assert_ne!(a, b);
    }

    #[test]
    fn cache_key_rounds_coordinates() {
        let a = place_cache_key("p", "q", GeoPoint::new(40.71281, -74.00601), 1000);
        let b = place_cache_key("p", "q", GeoPoint::new(40.71299, -74.00620), 1000);
        // 3 decimal places (~110m) collapse nearby centers
        assert_eq!(a, b);
    }
}
