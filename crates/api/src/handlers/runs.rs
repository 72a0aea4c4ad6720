use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use engine::models::RunStep;
use engine::AutomationRun;

use crate::error::ApiResult;
use crate::handlers::OrgId;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RunDetail {
    pub run: AutomationRun,
    pub steps: Vec<RunStep>,
}

/// GET /api/v1/runs/:id
pub async fn get(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RunDetail>> {
    let run = state.store.get_run_for_org(org, id).await?;
    let steps = state.store.list_steps(run.id).await?;
    Ok(Json(RunDetail { run, steps }))
}

/// POST /api/v1/runs/:id/cancel
///
/// `cancelled` is false when the run had already finished.
pub async fn cancel(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let cancelled = state.executor().cancel_run(org, id).await?;
    Ok(Json(json!({ "cancelled": cancelled })))
}
