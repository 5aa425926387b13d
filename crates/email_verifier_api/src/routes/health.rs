//! Health check and monitoring routes
//!
//! This module contains endpoints for service health checks, readiness
//! probes, and monitoring metrics.

use crate::AppState;
use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: std::time::SystemTime,
}

/// Health check endpoint - GET /health
///
/// Simple health check to verify the API is running.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: std::time::SystemTime::now(),
    })
}

/// Readiness response
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub timestamp: std::time::SystemTime,
}

/// Readiness check endpoint - GET /ready
///
/// Runs the pipeline's synchronous stages — the syntax gate and a blocklist
/// round-trip — on the configured probe address. No network is touched and
/// no domain coordinator is created, so probing is free and leaves the
/// domain gauge untouched.
pub async fn ready_handler(State(state): State<Arc<AppState>>) -> Json<ReadinessResponse> {
    let is_ready = state.verifier.self_check().await;
    if !is_ready {
        warn!("Readiness self-check failed");
    }

    Json(ReadinessResponse {
        ready: is_ready,
        timestamp: std::time::SystemTime::now(),
    })
}

/// Metrics endpoint - GET /metrics
///
/// Returns Prometheus-compatible metrics for monitoring.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> (StatusCode, String) {
    let metrics = format!(
        "# HELP email_verifier_domains_tracked Domains with a live coordinator\n\
         # TYPE email_verifier_domains_tracked gauge\n\
         email_verifier_domains_tracked {}\n\
         \n\
         # HELP email_verifier_disposable_domains_total Entries in the disposable blocklist\n\
         # TYPE email_verifier_disposable_domains_total gauge\n\
         email_verifier_disposable_domains_total {}\n\
         \n\
         # HELP email_verifier_build_info Build information\n\
         # TYPE email_verifier_build_info gauge\n\
         email_verifier_build_info{{version=\"{}\"}} 1\n",
        state.verifier.domain_count(),
        state.blocklist_store.len(),
        env!("CARGO_PKG_VERSION")
    );

    (StatusCode::OK, metrics)
}
