//! Sweep endpoints for an external scheduler.
//!
//! Each call requires `Authorization: Bearer <CRON_SECRET>`.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;

use engine::SweepReport;

use crate::error::{ApiError, ApiResult};
use crate::handlers::LimitQuery;
use crate::state::AppState;

const DEFAULT_BATCH: i64 = 100;
const MAX_BATCH: i64 = 1_000;

fn authorize(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let secret = state
        .config
        .cron_secret
        .as_deref()
        .ok_or(ApiError::Unauthorized("cron secret not configured"))?;
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized("missing bearer token"))?;

    if constant_time_eq(token.trim().as_bytes(), secret.as_bytes()) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("invalid bearer token"))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// POST /api/v1/cron/events
pub async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<SweepReport>> {
    authorize(&state, &headers)?;
    let report = state.processor.process_pending_events(query.resolve(DEFAULT_BATCH, MAX_BATCH)).await?;
    Ok(Json(report))
}

/// POST /api/v1/cron/runs
pub async fn runs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<SweepReport>> {
    authorize(&state, &headers)?;
    let report = state.processor.process_pending_runs(query.resolve(DEFAULT_BATCH, MAX_BATCH)).await?;
    Ok(Json(report))
}

/// POST /api/v1/cron/waits
pub async fn waits(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<SweepReport>> {
    authorize(&state, &headers)?;
    let report = state.processor.process_due_waits(query.resolve(DEFAULT_BATCH, MAX_BATCH)).await?;
    Ok(Json(report))
}
