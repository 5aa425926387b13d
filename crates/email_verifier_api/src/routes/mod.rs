//! API Routes Module
//!
//! This module organizes all HTTP endpoints into logical groups:
//! - `verify`: the verification endpoint
//! - `health`: health checks and monitoring endpoints

pub mod health;
pub mod verify;

use crate::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build all API routes and return a configured Router
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        // Verification endpoint
        .route("/v1/verify", post(verify::verify_handler))
        // Health and monitoring endpoints
        .route("/health", get(health::health_handler))
        .route("/ready", get(health::ready_handler))
        .route("/metrics", get(health::metrics_handler))
        // Apply shared state to all routes
        .with_state(state)
}
