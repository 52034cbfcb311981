//! HTTP server wiring
//!
//! The composition root: builds the caches, limiter, providers,
//! orchestrator and pipeline from configuration, owns the background
//! sweep tasks, and exposes the HTTP surface. The admission gateway
//! computes quota values; this layer turns them into headers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::HeaderName},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

use super::admission::{Admission, AdmissionGateway};
use super::service::{RecommendRequest, RecommendationService};
use crate::cache::{CacheDomain, ExpiringCache, spawn_sweep_task};
use crate::config::Config;
use crate::failsafe::{Failsafe, HealthTracker, SlidingWindowLimiter};
use crate::models::{GeoPoint, VenueCandidate};
use crate::orchestrator::SearchOrchestrator;
use crate::provider::{
    FoursquareProvider, InferenceClient, NominatimClient, PlaceProvider, WikipediaEnricher,
};
use crate::{Error, Result};

/// Shared application state.
pub struct AppState {
    admission: AdmissionGateway,
    service: RecommendationService,
    limiter: Arc<SlidingWindowLimiter>,
    geocode_cache: Arc<ExpiringCache<GeoPoint>>,
    places_cache: Arc<ExpiringCache<Vec<VenueCandidate>>>,
    enrich_cache: Arc<ExpiringCache<Option<String>>>,
    provider_health: Vec<Arc<HealthTracker>>,
}

/// Build the application state from configuration.
///
/// This is the only place instances are wired together; components
/// receive handles instead of reaching for globals, so tests can
/// construct isolated instances.
///
/// # Errors
///
/// Returns `Error::Config` on hard misconfiguration.
pub fn build_state(config: &Config) -> Result<Arc<AppState>> {
    config.validate()?;

    // Inbound limiter, shared by every gate
    let limiter = Arc::new(SlidingWindowLimiter::new());
    crate::failsafe::spawn_sweep_task(Arc::clone(&limiter), config.admission.sweep_interval);

    // One cache instance per domain, each with its own policy
    let geocode_domain = CacheDomain::new(
        "geocode",
        config.cache.geocode.max_entries,
        config.cache.geocode.ttl,
    );
    let places_domain = CacheDomain::new(
        "places",
        config.cache.places.max_entries,
        config.cache.places.ttl,
    );
    let enrich_domain = CacheDomain::new(
        "enrich",
        config.cache.enrich.max_entries,
        config.cache.enrich.ttl,
    );
    spawn_sweep_task(Arc::clone(geocode_domain.cache()), config.cache.sweep_interval);
    spawn_sweep_task(Arc::clone(places_domain.cache()), config.cache.sweep_interval);
    spawn_sweep_task(Arc::clone(enrich_domain.cache()), config.cache.sweep_interval);

    let mut provider_health = Vec::new();

    // Nominatim backs geocoding even when it is not enabled as a
    // place search provider
    let nominatim_failsafe = Failsafe::new(
        "nominatim",
        config.retry_for(config.providers.nominatim.retry.as_ref()),
        None,
    );
    let geocoder = Arc::new(NominatimClient::new(
        &config.providers.nominatim,
        nominatim_failsafe,
        geocode_domain.clone(),
        places_domain.clone(),
    )?);
    provider_health.push(geocoder.health());

    let mut providers: Vec<Arc<dyn PlaceProvider>> = Vec::new();
    if config.providers.nominatim.enabled {
        providers.push(Arc::clone(&geocoder) as Arc<dyn PlaceProvider>);
    }
    if config.providers.foursquare.enabled {
        let failsafe = Failsafe::new(
            "foursquare",
            config.retry_for(config.providers.foursquare.retry.as_ref()),
            config.providers.foursquare.requests_per_second,
        );
        let foursquare = Arc::new(FoursquareProvider::new(
            &config.providers.foursquare,
            failsafe,
            places_domain.clone(),
        )?);
        provider_health.push(foursquare.health());
        providers.push(foursquare);
    }

    let enricher = if config.providers.wikipedia.enabled {
        let failsafe = Failsafe::new(
            "wikipedia",
            config.retry_for(config.providers.wikipedia.retry.as_ref()),
            None,
        );
        let enricher = Arc::new(WikipediaEnricher::new(
            &config.providers.wikipedia,
            failsafe,
            enrich_domain.clone(),
        )?);
        provider_health.push(enricher.health());
        Some(enricher)
    } else {
        None
    };

    let inference = if config.providers.inference.enabled {
        let failsafe = Failsafe::new(
            "inference",
            config.retry_for(config.providers.inference.retry.as_ref()),
            None,
        );
        let client = Arc::new(InferenceClient::new(&config.providers.inference, failsafe)?);
        provider_health.push(client.health());
        Some(client)
    } else {
        None
    };

    let orchestrator = SearchOrchestrator::new(providers, config.orchestrator.clone());
    let service = RecommendationService::new(
        Arc::clone(&geocoder),
        orchestrator,
        enricher,
        inference,
        config.pipeline.clone(),
    );
    let admission = AdmissionGateway::new(Arc::clone(&limiter), config.admission.clone());

    Ok(Arc::new(AppState {
        admission,
        service,
        limiter,
        geocode_cache: Arc::clone(geocode_domain.cache()),
        places_cache: Arc::clone(places_domain.cache()),
        enrich_cache: Arc::clone(enrich_domain.cache()),
        provider_health,
    }))
}

/// Build the router over `state`.
fn router(state: Arc<AppState>, config: &Config) -> Router {
    Router::new()
        .route("/api/recommend", post(recommend))
        .route("/health", get(health))
        .route("/stats", get(stats))
        .layer(TimeoutLayer::new(config.server.request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

/// Run the server until shutdown.
///
/// # Errors
///
/// Returns an error on invalid configuration or if the listener
/// cannot bind.
pub async fn run(config: Config) -> Result<()> {
    let state = build_state(&config)?;
    let app = router(state, &config);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Venuescout listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("Failed to install shutdown signal handler");
        return;
    }
    info!("Shutdown signal received, draining connections");
}

/// Client key for rate limiting: the first X-Forwarded-For hop when
/// present, otherwise the peer address.
fn client_key(headers: &HeaderMap, addr: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| addr.ip().to_string())
}

/// Quota headers computed by the admission gateway.
fn rate_limit_headers(admission: &Admission) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let decision = &admission.decision;

    let mut put = |name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(HeaderName::from_static(name), value);
        }
    };
    put("x-ratelimit-limit", decision.limit.to_string());
    put("x-ratelimit-remaining", decision.remaining.to_string());
    put("x-ratelimit-reset", (decision.reset_at / 1000).to_string());
    if !decision.allowed {
        put("retry-after", decision.retry_after_secs().to_string());
    }
    headers
}

async fn recommend(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<RecommendRequest>,
) -> Response {
    let key = client_key(&headers, addr);
    let admission = state.admission.admit("recommend", &key);
    let quota_headers = rate_limit_headers(&admission);

    if !admission.allowed() {
        let err = Error::RateLimited {
            scope: admission.scope.clone(),
            retry_after: admission.decision.retry_after.unwrap_or_default(),
        };
        let body = json!({
            "error": err.to_string(),
            "retry_after_seconds": admission.decision.retry_after_secs(),
        });
        return (StatusCode::TOO_MANY_REQUESTS, quota_headers, Json(body)).into_response();
    }

    match state.service.recommend(request).await {
        Ok(response) => (StatusCode::OK, quota_headers, Json(response)).into_response(),
        Err(e) => {
            let status =
                StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status.is_server_error() {
                error!(error = %e, "Recommendation failed");
            }
            let body = json!({ "error": e.to_string() });
            (status, quota_headers, Json(body)).into_response()
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let caches = vec![
        state.geocode_cache.stats(),
        state.places_cache.stats(),
        state.enrich_cache.stats(),
    ];
    let providers: Vec<_> = state
        .provider_health
        .iter()
        .map(|h| h.metrics())
        .collect();

    Json(json!({
        "caches": caches,
        "admission": {
            "tracked_identifiers": state.limiter.tracked_identifiers(),
        },
        "providers": providers,
        "generated_at": Utc::now(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_key_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.9, 10.0.0.1"),
        );
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        assert_eq!(client_key(&headers, addr), "203.0.113.9");
    }

    #[test]
    fn client_key_falls_back_to_peer_address() {
        let headers = HeaderMap::new();
        let addr: SocketAddr = "192.0.2.4:1234".parse().unwrap();
        assert_eq!(client_key(&headers, addr), "192.0.2.4");
    }

    #[test]
    fn denied_admission_produces_retry_after_header() {
        let admission = Admission {
            scope: "recommend:test".to_string(),
            decision: crate::failsafe::RateLimitDecision {
                allowed: false,
                limit: 10,
                remaining: 0,
                reset_at: 1_700_000_001_500,
                retry_after: Some(std::time::Duration::from_millis(2500)),
            },
        };

        let headers = rate_limit_headers(&admission);
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");
        assert_eq!(headers.get("x-ratelimit-reset").unwrap(), "1700000001");
        assert_eq!(headers.get("retry-after").unwrap(), "3");
    }

    #[test]
    fn allowed_admission_omits_retry_after() {
        let admission = Admission {
            scope: "global:test".to_string(),
            decision: crate::failsafe::RateLimitDecision {
                allowed: true,
                limit: 60,
                remaining: 59,
                reset_at: 1_700_000_000_000,
                retry_after: None,
            },
        };

        let headers = rate_limit_headers(&admission);
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "60");
        assert!(headers.get("retry-after").is_none());
    }
}
