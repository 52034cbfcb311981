//! Inbound admission control
//!
//! Two stacked sliding-window gates run before any orchestration
//! work: a global per-client gate, then a per-route gate. A request
//! must pass both. The gateway computes the quota headers; attaching
//! them to responses is the HTTP layer's job.

use std::sync::Arc;

use crate::config::AdmissionConfig;
use crate::failsafe::{RateLimitDecision, SlidingWindowLimiter};

/// Outcome of admission, carrying the decision whose headers the HTTP
/// layer should expose.
#[derive(Debug, Clone)]
pub struct Admission {
    /// Identifier of the gate that produced `decision`
    pub scope: String,
    /// The governing rate limit decision
    pub decision: RateLimitDecision,
}

impl Admission {
    /// Whether the request may proceed.
    #[must_use]
    pub fn allowed(&self) -> bool {
        self.decision.allowed
    }
}

/// Applies rate limiting at the global level and per logical route.
pub struct AdmissionGateway {
    limiter: Arc<SlidingWindowLimiter>,
    config: AdmissionConfig,
}

impl AdmissionGateway {
    /// Create a new gateway sharing `limiter`.
    #[must_use]
    pub fn new(limiter: Arc<SlidingWindowLimiter>, config: AdmissionConfig) -> Self {
        Self { limiter, config }
    }

    /// Check both gates for `client_key` on `route`.
    ///
    /// The global gate is consumed first; when it denies, the route
    /// gate is not consulted. When both allow, the admission with the
    /// fewest remaining slots is reported so clients see the binding
    /// constraint.
    pub fn admit(&self, route: &str, client_key: &str) -> Admission {
        if !self.config.enabled {
            return Admission {
                scope: "disabled".to_string(),
                decision: RateLimitDecision {
                    allowed: true,
                    limit: u32::MAX,
                    remaining: u32::MAX,
                    reset_at: 0,
                    retry_after: None,
                },
            };
        }

        let global_id = format!("global:{client_key}");
        let global = self
            .limiter
            .check(&global_id, self.config.global.limit, self.config.global.window);
        if !global.allowed {
            return Admission {
                scope: global_id,
                decision: global,
            };
        }

        let policy = self
            .config
            .routes
            .get(route)
            .copied()
            .unwrap_or(self.config.route_default);
        let route_id = format!("{route}:{client_key}");
        let route_decision = self.limiter.check(&route_id, policy.limit, policy.window);

        if !route_decision.allowed || route_decision.remaining <= global.remaining {
            Admission {
                scope: route_id,
                decision: route_decision,
            }
        } else {
            Admission {
                scope: global_id,
                decision: global,
            }
        }
    }
}
