//! Delivery endpoint of the HTTP delay queue.
//!
//! The queue POSTs `{"type": "automation_step", "data": {...}}` signed with
//! HMAC-SHA256 in `x-queue-signature`.  Anything unsigned is a 401.  Once
//! the signature checks out the response is always 200 so the queue does
//! not retry work the engine already saw; engine failures come back in the
//! `error` field and the sweeps pick up what was left behind.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use engine::dispatch_job;
use queue::{QueueEnvelope, SIGNATURE_HEADER};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// POST /api/v1/queue/automation
pub async fn deliver(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> ApiResult<Json<Value>> {
    let verifier = state
        .verifier
        .as_ref()
        .ok_or(ApiError::Unauthorized("queue signing key not configured"))?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized("missing signature"))?;

    let verification = verifier.verify(signature, &body);
    if !verification.is_valid {
        tracing::warn!("queue delivery with invalid signature rejected");
        return Err(ApiError::Unauthorized("invalid signature"));
    }

    let envelope: QueueEnvelope = match verification.body.map(serde_json::from_value::<QueueEnvelope>) {
        Some(Ok(envelope)) => envelope,
        Some(Err(e)) => return Err(ApiError::BadRequest(format!("malformed delivery: {e}"))),
        None => return Err(ApiError::BadRequest("delivery body is not JSON".into())),
    };

    match dispatch_job(state.executor(), &envelope.job_type, envelope.data).await {
        Ok(outcome) => Ok(Json(json!({ "ok": true, "outcome": outcome }))),
        Err(e) => {
            tracing::error!(job_type = %envelope.job_type, error = %e, "queue delivery failed");
            Ok(Json(json!({ "ok": false, "error": e.to_string() })))
        }
    }
}
