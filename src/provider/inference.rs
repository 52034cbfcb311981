//! LLM ranking adapter
//!
//! Asks an OpenAI-compatible chat-completions endpoint to order the
//! merged venue set for the occasion and explain each choice. The
//! response is constrained to a JSON array so parsing stays mechanical.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::InferenceConfig;
use crate::failsafe::Failsafe;
use crate::models::{RankedVenue, VenueCandidate};
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// One entry of the model's ranking output.
#[derive(Debug, Deserialize)]
struct RankEntry {
    identity: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Client for an OpenAI-compatible inference API.
pub struct InferenceClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
    failsafe: Failsafe,
}

impl InferenceClient {
    /// Create a new client.
    pub fn new(config: &InferenceConfig, failsafe: Failsafe) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            failsafe,
        })
    }

    /// Health tracker handle for the stats endpoint.
    #[must_use]
    pub fn health(&self) -> std::sync::Arc<crate::failsafe::HealthTracker> {
        std::sync::Arc::clone(&self.failsafe.health)
    }

    /// Rank `venues` for `occasion`.
    ///
    /// Venues the model skips (or hallucinated identities) keep their
    /// merged order after the ranked ones, so the result always covers
    /// the full input set exactly once.
    pub async fn rank(&self, occasion: &str, venues: &[VenueCandidate]) -> Result<Vec<RankedVenue>> {
        if venues.is_empty() {
            return Ok(Vec::new());
        }

        let body = self.request_body(occasion, venues);
        let content = self
            .failsafe
            .run("inference.rank", || self.fetch(body.clone()))
            .await?;

        Ok(Self::apply_ranking(&content, venues))
    }

    fn request_body(&self, occasion: &str, venues: &[VenueCandidate]) -> serde_json::Value {
        let listing: Vec<serde_json::Value> = venues
            .iter()
            .map(|v| {
                json!({
                    "identity": v.identity,
                    "name": v.name,
                    "address": v.address,
                    "rating": v.rating,
                    "review_count": v.review_count,
                    "categories": v.categories,
                    "summary": v.summary,
                })
            })
            .collect();

        json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You rank venues for an occasion. Reply with only a JSON array, \
                                best venue first, of objects {\"identity\": string, \"reason\": string}."
                },
                {
                    "role": "user",
                    "content": format!(
                        "Occasion: {occasion}\nVenues:\n{}",
                        serde_json::Value::Array(listing)
                    )
                }
            ],
            "temperature": 0.2,
        })
    }

    async fn fetch(&self, body: serde_json::Value) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::ProviderStatus {
                provider: "inference".to_string(),
                status: status.as_u16(),
            });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| Error::MalformedResponse {
            provider: "inference".to_string(),
            message: e.to_string(),
        })?;
        chat.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::MalformedResponse {
                provider: "inference".to_string(),
                message: "no choices in response".to_string(),
            })
    }

    /// Merge the model's ordering back onto the candidate set.
    fn apply_ranking(content: &str, venues: &[VenueCandidate]) -> Vec<RankedVenue> {
        let entries: Vec<RankEntry> = match serde_json::from_str(Self::strip_fences(content)) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Ranking output was not valid JSON, keeping merged order");
                return venues.iter().cloned().map(RankedVenue::unranked).collect();
            }
        };

        let mut ranked = Vec::with_capacity(venues.len());
        let mut taken = vec![false; venues.len()];

        for entry in entries {
            let found = venues
                .iter()
                .enumerate()
                .find(|(idx, v)| v.identity == entry.identity && !taken[*idx])
                .map(|(idx, _)| idx);
            if let Some(idx) = found {
                taken[idx] = true;
                ranked.push(RankedVenue {
                    venue: venues[idx].clone(),
                    reason: entry.reason,
                });
            } else {
                debug!(identity = %entry.identity, "Ranking referenced unknown venue");
            }
        }

        // Anything the model skipped keeps its merged order
        for (idx, venue) in venues.iter().enumerate() {
            if !taken[idx] {
                ranked.push(RankedVenue::unranked(venue.clone()));
            }
        }

        ranked
    }

    /// Tolerate markdown-fenced output.
    fn strip_fences(content: &str) -> &str {
        let trimmed = content.trim();
        trimmed
            .strip_prefix("```json")
            .or_else(|| trimmed.strip_prefix("```"))
            .and_then(|s| s.strip_suffix("```"))
            .map_or(trimmed, str::trim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GeoPoint, identity_key};

    fn venue(name: &str, lat: f64) -> VenueCandidate {
        let location = GeoPoint::new(lat, -74.0);
        VenueCandidate {
            identity: identity_key(location, name),
            name: name.to_string(),
            address: String::new(),
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
    fn ranking_reorders_and_carries_reasons() {
        let venues = vec![venue("Alpha", 40.1), venue("Beta", 40.2)];
        let content = format!(
            r#"[{{"identity": "{}", "reason": "quieter"}}, {{"identity": "{}"}}]"#,
            venues[1].identity, venues[0].identity
        );

        let ranked = InferenceClient::apply_ranking(&content, &venues);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].venue.name, "Beta");
        assert_eq!(ranked[0].reason.as_deref(), Some("quieter"));
        assert_eq!(ranked[1].venue.name, "Alpha");
    }

    #[test]
    fn skipped_and_unknown_identities_degrade_gracefully() {
        let venues = vec![venue("Alpha", 40.1), venue("Beta", 40.2)];
        let content = format!(
            r#"[{{"identity": "made-up"}}, {{"identity": "{}"}}]"#,
            venues[1].identity
        );

        let ranked = InferenceClient::apply_ranking(&content, &venues);
        // Unknown identity dropped, skipped venue appended in merged order
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].venue.name, "Beta");
        assert_eq!(ranked[1].venue.name, "Alpha");
    }

    #[test]
    fn invalid_json_keeps_merged_order() {
        let venues = vec![venue("Alpha", 40.1), venue("Beta", 40.2)];
        let ranked = InferenceClient::apply_ranking("sorry, I cannot do that", &venues);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].venue.name, "Alpha");
        assert!(ranked[0].reason.is_none());
    }

    #[test]
    fn fenced_output_is_tolerated() {
        let venues = vec![venue("Alpha", 40.1)];
        let content = format!(
            "```json\n[{{\"identity\": \"{}\", \"reason\": \"only option\"}}]\n```",
            venues[0].identity
        );
        let ranked = InferenceClient::apply_ranking(&content, &venues);
        assert_eq!(ranked[0].reason.as_deref(), Some("only option"));
    }

    #[test]
    fn duplicate_identities_in_ranking_are_taken_once() {
        let venues = vec![venue("Alpha", 40.1)];
        let content = format!(
            r#"[{{"identity": "{id}"}}, {{"identity": "{id}"}}]"#,
            id = venues[0].identity
        );
        let ranked = InferenceClient::apply_ranking(&content, &venues);
        assert_eq!(ranked.len(), 1);
    }
}
