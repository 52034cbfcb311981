//! Core data models shared across providers and the orchestrator

use serde::{Deserialize, Serialize};

/// A WGS84 coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude in decimal degrees
    pub lat: f64,
    /// Longitude in decimal degrees
    pub lng: f64,
}

impl GeoPoint {
    /// Create a new point.
    #[must_use]
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// A candidate venue produced by a place provider.
///
/// Candidates from different providers describing the same physical
/// place carry the same `identity` (see [`identity_key`]), so the
/// orchestrator can merge them without string-similarity heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueCandidate {
    /// Stable identity used for cross-query and cross-provider dedup
    pub identity: String,
    /// Display name
    pub name: String,
    /// Human-readable address
    pub address: String,
    /// Coordinates
    pub location: GeoPoint,
    /// Rating on the provider's scale, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f32>,
    /// Number of ratings/reviews behind the rating
    #[serde(default)]
    pub review_count: u32,
    /// Representative photo URL, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    /// Provider category labels
    #[serde(default)]
    pub categories: Vec<String>,
    /// Name of the provider that produced this candidate
    pub source: String,
    /// Enrichment summary, filled in after the search pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl VenueCandidate {
    /// Whether this candidate carries at least one quality signal:
    /// a rating, a photo, or a review.
    #[must_use]
    pub fn has_quality_signal(&self) -> bool {
        self.rating.is_some() || self.photo_url.is_some() || self.review_count > 0
    }
}

/// Compute the stable composite identity for a venue.
///
/// Coordinates are rounded to 4 decimal places (~11m) and the name is
/// lowercased with everything but alphanumerics stripped, so the same
/// physical place reported by two providers collapses to one key.
#[must_use]
pub fn identity_key(location: GeoPoint, name: &str) -> String {
    let normalized: String = name
        .to_lowercase()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();
    format!("{:.4},{:.4}:{normalized}", location.lat, location.lng)
}

/// A venue paired with its position in the final ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedVenue {
    /// The venue
    #[serde(flatten)]
    pub venue: VenueCandidate,
    /// Why the ranker chose this venue, when a ranker ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RankedVenue {
    /// Wrap a candidate with no ranking rationale.
    #[must_use]
    pub fn unranked(venue: VenueCandidate) -> Self {
        Self {
            venue,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str) -> VenueCandidate {
        let location = GeoPoint::new(40.7128, -74.006);
        VenueCandidate {
            identity: identity_key(location, name),
            name: name.to_string(),
            address: "1 Test St".to_string(),
            location,
            rating: None,
            review_count: 0,
            photo_url: None,
            categories: Vec::new(),
            source: "test".to_string(),
            summary: None,
        }
    }

    #[test]
    fn identity_key_normalizes_name() {
        let at = GeoPoint::new(40.7128, -74.006);
        assert_eq!(
            identity_key(at, "Joe's Pizza"),
            identity_key(at, "JOES PIZZA")
        );
    }

    #[test]
    fn identity_key_distinguishes_locations() {
        let a = GeoPoint::new(40.7128, -74.006);
        let b = GeoPoint::new(40.7131, -74.006);
        assert_ne!(identity_key(a, "Joe's Pizza"), identity_key(b, "Joe's Pizza"));
    }

    #[test]
    fn identity_key_rounds_nearby_coordinates_together() {
        // Within ~11m the rounded key is identical
        let a = GeoPoint::new(40.71281, -74.00601);
        let b = GeoPoint::new(40.71279, -74.00599);
        assert_eq!(identity_key(a, "Same Place"), identity_key(b, "Same Place"));
    }

    #[test]
    fn quality_signal_requires_rating_photo_or_review() {
        let mut v = candidate("Quiet Cafe");
        assert!(!v.has_quality_signal());

        v.rating = Some(4.2);
        assert!(v.has_quality_signal());

        v.rating = None;
        v.review_count = 3;
        assert!(v.has_quality_signal());

        v.review_count = 0;
        v.photo_url = Some("https://example.com/p.jpg".to_string());
        assert!(v.has_quality_signal());
    }
}
