//! Venuescout Library
//!
//! Resilient external-call orchestration for venue recommendations.
//!
//! # Features
//!
//! - **Expiring LRU caches**: one bounded instance per upstream domain
//! - **Sliding-window admission control**: stacked global and per-route gates
//! - **Bounded retries**: exponential backoff with jitter over an explicit
//!   allow-list of transient failures
//! - **Search fan-out**: multi-provider dispatch with dedup, quality
//!   filtering, and graceful degradation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod failsafe;
pub mod gateway;
pub mod models;
pub mod orchestrator;
pub mod provider;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
