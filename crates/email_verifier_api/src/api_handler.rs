//! Shared API types and utilities
//!
//! This module contains common types, error handling, and conversion
//! utilities used across all API endpoints.

use axum::{http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use verify_core::{VerificationResult, VerifyError};

/// Request body for POST verification
#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    /// Address to verify
    pub email: String,
}

/// API response for a verification; mirrors the core result on the wire
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    #[serde(flatten)]
    pub result: VerificationResult,
}

/// Error response structure
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    pub request_id: String,
    pub timestamp: String,
    /// Advisory retry delay in seconds, present on admission rejections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Result type for API handlers
pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Missing or empty email parameter
    MissingEmail,
    /// Per-domain admission gate is closed; carries the advisory retry-after
    AdmissionRejected { retry_after_secs: u64 },
    /// Outer request deadline expired
    Timeout,
    /// Unexpected failure
    Internal(String),
}

impl ApiError {
    /// Translate a core pipeline error, attaching the advisory retry-after.
    pub fn from_verify_error(err: VerifyError, retry_after_secs: u64) -> Self {
        match err {
            VerifyError::InvalidInput(_) => ApiError::MissingEmail,
            VerifyError::AdmissionRejected => ApiError::AdmissionRejected { retry_after_secs },
            VerifyError::Unavailable(msg) => ApiError::Internal(msg),
            VerifyError::Internal(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_code, message, retry_after) = match self {
            ApiError::MissingEmail => (
                StatusCode::BAD_REQUEST,
                "MISSING_EMAIL",
                "Missing or empty email".to_string(),
                None,
            ),
            ApiError::AdmissionRejected { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                "TOO_MANY_VERIFICATIONS",
                "Too many concurrent verifications".to_string(),
                Some(retry_after_secs),
            ),
            ApiError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "VERIFICATION_TIMEOUT",
                "Verification timed out".to_string(),
                None,
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
                None,
            ),
        };

        let error_response = ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            request_id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            retry_after,
        };

        (status, Json(error_response)).into_response()
    }
}
