//! HTTP gateway: admission control, recommendation pipeline, server

mod admission;
mod server;
mod service;

pub use admission::{Admission, AdmissionGateway};
pub use server::{AppState, build_state, run};
pub use service::{RecommendRequest, RecommendResponse, RecommendationService};
