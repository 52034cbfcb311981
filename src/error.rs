//! Error types for venuescout

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for venuescout
pub type Result<T> = std::result::Result<T, Error>;

/// Venuescout errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (missing credentials, no providers enabled, bad file)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inbound request is malformed (e.g. neither location nor coordinates)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A location string resolved to nothing
    #[error("Location not found: {0}")]
    LocationNotFound(String),

    /// Upstream provider returned a non-success HTTP status
    #[error("Provider {provider} returned status {status}")]
    ProviderStatus {
        /// Provider name
        provider: String,
        /// HTTP status code
        status: u16,
    },

    /// Upstream provider returned a body we could not interpret
    #[error("Provider {provider} returned a malformed response: {message}")]
    MalformedResponse {
        /// Provider name
        provider: String,
        /// What went wrong
        message: String,
    },

    /// Admission or provider quota exceeded
    #[error("Rate limited on {scope}, retry after {retry_after:?}")]
    RateLimited {
        /// Limiter scope that rejected the request
        scope: String,
        /// How long until a slot frees up
        retry_after: Duration,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Upstream HTTP status carried by this error, when there is one.
    #[must_use]
    pub fn provider_status(&self) -> Option<u16> {
        match self {
            Self::ProviderStatus { status, .. } => Some(*status),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether this error is a transport-level failure: timeout,
    /// connection refused/reset, or DNS resolution.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Io(_) => true,
            _ => false,
        }
    }

    /// HTTP status the gateway should answer with for this error.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::LocationNotFound(_) => 404,
            Self::RateLimited { .. } => 429,
            Self::ProviderStatus { .. } | Self::MalformedResponse { .. } | Self::Http(_) => 502,
            _ => 500,
        }
    }
}
