//! Wikipedia enrichment adapter
//!
//! Fetches a short summary for a venue from the Wikipedia REST API.
//! Enrichment is best-effort: an unknown title is a normal outcome,
//! not a failure.

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::cache::CacheDomain;
use crate::config::WikipediaConfig;
use crate::failsafe::Failsafe;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    extract: String,
}

/// Client for the Wikipedia page-summary endpoint.
pub struct WikipediaEnricher {
    http: Client,
    base_url: Url,
    failsafe: Failsafe,
    cache: CacheDomain<Option<String>>,
}

impl WikipediaEnricher {
    /// Create a new enricher.
    pub fn new(
        config: &WikipediaConfig,
        failsafe: Failsafe,
        cache: CacheDomain<Option<String>>,
    ) -> Result<Self> {
        let http = Client::builder().timeout(config.timeout).build()?;
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| Error::Config(format!("invalid wikipedia base_url: {e}")))?;

        Ok(Self {
            http,
            base_url,
            failsafe,
            cache,
        })
    }

    /// Health tracker handle for the stats endpoint.
    #[must_use]
    pub fn health(&self) -> std::sync::Arc<crate::failsafe::HealthTracker> {
        std::sync::Arc::clone(&self.failsafe.health)
    }

    /// Fetch a summary for `title`, caching both hits and known misses.
    ///
    /// Returns `Ok(None)` when Wikipedia has no page for the title.
    pub async fn summarize(&self, title: &str) -> Result<Option<String>> {
        let key = format!("wiki:{}", title.trim().to_lowercase());
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let summary = self
            .failsafe
            .run("wikipedia.summary", || self.fetch(title))
            .await?;

        self.cache.set(key, summary.clone());
        Ok(summary)
    }

    async fn fetch(&self, title: &str) -> Result<Option<String>> {
        // Wikipedia titles use underscores for spaces; the Url path
        // segment API percent-encodes the rest.
        let title = title.replace(' ', "_");
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config("wikipedia base_url cannot be a base".to_string()))?
            .push("page")
            .push("summary")
            .push(&title);

        let response = self.http.get(url).send().await?;
        let status = response.status();

        // No page for this title: a normal outcome, cached as a miss
        if status.as_u16() == 404 {
            debug!(title, "No Wikipedia page");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::ProviderStatus {
                provider: "wikipedia".to_string(),
                status: status.as_u16(),
            });
        }

        let summary: SummaryResponse =
            response.json().await.map_err(|e| Error::MalformedResponse {
                provider: "wikipedia".to_string(),
                message: e.to_string(),
            })?;

        if summary.extract.is_empty() {
            Ok(None)
        } else {
            Ok(Some(summary.extract))
        }
    }
}
