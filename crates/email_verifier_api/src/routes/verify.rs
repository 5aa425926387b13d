//! Verification route handler
//!
//! POST /v1/verify runs one address through the pipeline: syntax gate,
//! blocklist, DNS, SMTP probing and scoring, all behind the per-domain
//! coordinator. The handler only adds the outer request deadline and the
//! HTTP status mapping.

use crate::api_handler::{ApiError, ApiResult, VerifyRequest, VerifyResponse};
use crate::AppState;
use axum::{extract::State, response::Json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// POST /v1/verify
///
/// Body: `{"email": "<addr>"}`. Responds 200 with the verification result,
/// 400 on a missing address, 429 when the domain's admission gate is
/// closed, and 504 when the outer deadline expires.
#[instrument(skip(state, request), fields(request_id))]
pub async fn verify_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyRequest>,
) -> ApiResult<VerifyResponse> {
    let request_id = Uuid::new_v4().to_string();
    tracing::Span::current().record("request_id", &request_id);

    if request.email.trim().is_empty() {
        warn!("Empty email in verification request");
        return Err(ApiError::MissingEmail);
    }

    let start_time = std::time::Instant::now();
    let deadline = Duration::from_millis(state.config.server.request_timeout_ms);
    let retry_after = state.config.verification.gray_retry_after_secs;

    let result = tokio::time::timeout(deadline, state.verifier.verify(&request.email))
        .await
        .map_err(|_| {
            warn!("Request deadline expired");
            ApiError::Timeout
        })?
        .map_err(|e| ApiError::from_verify_error(e, retry_after))?;

    debug!("Verification completed in {:?}", start_time.elapsed());
    info!(
        "Verified {}: {:?} (score {})",
        result.email, result.status, result.score
    );

    Ok(Json(VerifyResponse { result }))
}
