//! Configuration management

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Inbound admission control configuration
    pub admission: AdmissionConfig,
    /// Cache domain configuration
    pub cache: CacheConfig,
    /// Default retry policy (providers may override)
    pub retry: RetryConfig,
    /// Provider configurations
    pub providers: ProvidersConfig,
    /// Search orchestrator configuration
    pub orchestrator: OrchestratorConfig,
    /// Recommendation pipeline configuration
    pub pipeline: PipelineConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39700,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// A rate limit policy: at most `limit` admissions per `window`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RatePolicy {
    /// Maximum admissions inside one window
    pub limit: u32,
    /// Window length
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

/// Inbound admission control configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Enable admission control
    pub enabled: bool,
    /// Global per-client policy, checked before any route policy
    pub global: RatePolicy,
    /// Per-route policies keyed by route name
    pub routes: HashMap<String, RatePolicy>,
    /// Policy for routes with no explicit entry
    pub route_default: RatePolicy,
    /// How often idle identifiers are swept
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let mut routes = HashMap::new();
        routes.insert(
            "recommend".to_string(),
            RatePolicy {
                limit: 10,
                window: Duration::from_secs(60),
            },
        );
        Self {
            enabled: true,
            global: RatePolicy {
                limit: 60,
                window: Duration::from_secs(60),
            },
            routes,
            route_default: RatePolicy {
                limit: 30,
                window: Duration::from_secs(60),
            },
            sweep_interval: Duration::from_secs(120),
        }
    }
}

/// Size and TTL policy for one cache domain
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheDomainConfig {
    /// Maximum number of entries before LRU eviction
    pub max_entries: usize,
    /// Per-entry time-to-live
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

/// Cache configuration
///
/// Each domain is sized and timed independently: geocoding results are
/// near-immutable (long TTL, small size), place search results go
/// stale quickly (shorter TTL, larger size).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How often expired entries are swept
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// Geocoding result cache
    pub geocode: CacheDomainConfig,
    /// Place search result cache
    pub places: CacheDomainConfig,
    /// Enrichment summary cache
    pub enrich: CacheDomainConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            geocode: CacheDomainConfig {
                max_entries: 500,
                ttl: Duration::from_secs(24 * 60 * 60),
            },
            places: CacheDomainConfig {
                max_entries: 2_000,
                ttl: Duration::from_secs(30 * 60),
            },
            enrich: CacheDomainConfig {
                max_entries: 1_000,
                ttl: Duration::from_secs(6 * 60 * 60),
            },
        }
    }
}

/// Which failures count as transient and are worth retrying.
///
/// An explicit allow-list: anything not matched propagates immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryableErrors {
    /// Exact HTTP status codes to retry (e.g. 429)
    pub statuses: Vec<u16>,
    /// Retry any 5xx status
    pub server_errors: bool,
    /// Retry transport-level failures (timeout, reset, refused, DNS)
    pub transport: bool,
}

impl Default for RetryableErrors {
    fn default() -> Self {
        Self {
            statuses: vec![429],
            server_errors: true,
            transport: true,
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first call
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Upper bound for random jitter added to each delay
    #[serde(with = "humantime_serde")]
    pub max_jitter: Duration,
    /// Retryable-condition allow-list
    pub retry_on: RetryableErrors,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            max_jitter: Duration::from_millis(100),
            retry_on: RetryableErrors::default(),
        }
    }
}

/// Provider configurations
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Nominatim (geocoding + public place search)
    pub nominatim: NominatimConfig,
    /// Foursquare place search
    pub foursquare: FoursquareConfig,
    /// Wikipedia enrichment
    pub wikipedia: WikipediaConfig,
    /// LLM ranking
    pub inference: InferenceConfig,
}

/// Nominatim configuration (no-key public service)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NominatimConfig {
    /// Enable this provider
    pub enabled: bool,
    /// API base URL
    pub base_url: String,
    /// User-Agent header (required by the Nominatim usage policy)
    pub user_agent: String,
    /// Delay between queries in one orchestration pass
    #[serde(with = "humantime_serde")]
    pub inter_query_delay: Duration,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retry override for this provider
    pub retry: Option<RetryConfig>,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: "venuescout/0.4 (+https://github.com/venuescout/venuescout)".to_string(),
            inter_query_delay: Duration::from_millis(1100),
            timeout: Duration::from_secs(10),
            retry: None,
        }
    }
}

/// Foursquare configuration (keyed, generous quota)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FoursquareConfig {
    /// Enable this provider
    pub enabled: bool,
    /// API base URL
    pub base_url: String,
    /// API key (supports `${VAR}` / `${VAR:-default}` expansion)
    pub api_key: String,
    /// Sustained outbound requests per second (None = unpaced)
    pub requests_per_second: Option<u32>,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retry override for this provider
    pub retry: Option<RetryConfig>,
}

impl Default for FoursquareConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.foursquare.com/v3".to_string(),
            api_key: "${FOURSQUARE_API_KEY:-}".to_string(),
            requests_per_second: Some(10),
            timeout: Duration::from_secs(10),
            retry: None,
        }
    }
}

/// Wikipedia enrichment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WikipediaConfig {
    /// Enable enrichment
    pub enabled: bool,
    /// REST API base URL
    pub base_url: String,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retry override for this provider
    pub retry: Option<RetryConfig>,
}

impl Default for WikipediaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://en.wikipedia.org/api/rest_v1".to_string(),
            timeout: Duration::from_secs(8),
            retry: None,
        }
    }
}

/// LLM ranking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Enable ranking
    pub enabled: bool,
    /// OpenAI-compatible API base URL
    pub base_url: String,
    /// API key (supports `${VAR}` expansion)
    pub api_key: String,
    /// Model identifier
    pub model: String,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Retry override for this provider
    pub retry: Option<RetryConfig>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: "${OPENAI_API_KEY:-}".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(30),
            retry: None,
        }
    }
}

/// Search orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Cap on the merged result set
    pub max_results: usize,
    /// Result limit requested from a provider per query
    pub per_query_limit: usize,
    /// Cap on queries dispatched in one pass
    pub max_queries: usize,
    /// If the quality filter keeps fewer than this, skip the filter
    pub quality_floor: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_results: 15,
            per_query_limit: 10,
            max_queries: 5,
            quality_floor: 3,
        }
    }
}

/// Recommendation pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Search radius when the request does not specify one (meters)
    pub default_radius_m: u32,
    /// How many top venues to enrich with summaries
    pub enrich_top: usize,
    /// Query templates applied to the occasion when the caller
    /// supplies no queries; `{occasion}` is substituted
    pub query_templates: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_radius_m: 2_000,
            enrich_top: 5,
            query_templates: vec![
                "{occasion}".to_string(),
                "best {occasion}".to_string(),
            ],
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (VENUESCOUT_ prefix)
        figment = figment.merge(Env::prefixed("VENUESCOUT_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into the process environment before expansion
        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand `${VAR}` and `${VAR:-default}` patterns in secret-bearing values
    fn expand_env_vars(&mut self) {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").unwrap();

        self.providers.foursquare.api_key =
            Self::expand_string(&re, &self.providers.foursquare.api_key);
        self.providers.inference.api_key =
            Self::expand_string(&re, &self.providers.inference.api_key);
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Effective retry policy for a provider, falling back to the
    /// crate-wide default.
    #[must_use]
    pub fn retry_for<'a>(&'a self, provider_override: Option<&'a RetryConfig>) -> &'a RetryConfig {
        provider_override.unwrap_or(&self.retry)
    }

    /// Effective rate policy for a route.
    #[must_use]
    pub fn route_policy(&self, route: &str) -> RatePolicy {
        self.admission
            .routes
            .get(route)
            .copied()
            .unwrap_or(self.admission.route_default)
    }

    /// Validate the configuration.
    ///
    /// Only hard misconfiguration is fatal: everything else in the
    /// system degrades gracefully at runtime.
    pub fn validate(&self) -> Result<()> {
        if !self.providers.nominatim.enabled && !self.providers.foursquare.enabled {
            return Err(Error::Config(
                "no place provider enabled: enable providers.nominatim or providers.foursquare"
                    .to_string(),
            ));
        }
        if self.providers.foursquare.enabled && self.providers.foursquare.api_key.is_empty() {
            return Err(Error::Config(
                "providers.foursquare.enabled requires providers.foursquare.api_key".to_string(),
            ));
        }
        if self.providers.inference.enabled && self.providers.inference.api_key.is_empty() {
            return Err(Error::Config(
                "providers.inference.enabled requires providers.inference.api_key".to_string(),
            ));
        }
        if self.orchestrator.max_results == 0 {
            return Err(Error::Config(
                "orchestrator.max_results must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
