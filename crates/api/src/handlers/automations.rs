//! Automation CRUD and manual triggering.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use engine::models::{AutomationStatus, NewAutomation};
use engine::{validate_graph, Automation, AutomationEvent, AutomationRun, TriggerType};

use crate::error::{ApiError, ApiResult};
use crate::handlers::{LimitQuery, OrgId};
use crate::state::AppState;

/// POST /api/v1/automations
///
/// The graph is validated against the node registry before it is stored.
pub async fn create(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Json(body): Json<NewAutomation>,
) -> ApiResult<(StatusCode, Json<Automation>)> {
    if body.name.trim().is_empty() {
        return Err(ApiError::BadRequest("name must not be empty".into()));
    }
    if !(body.trigger_config.is_null() || body.trigger_config.is_object()) {
        return Err(ApiError::BadRequest("trigger_config must be an object".into()));
    }

    let candidate = Automation::new(org, body.name.clone(), body.trigger_type, body.nodes.clone(), body.edges.clone());
    validate_graph(&candidate, state.executor().registry())?;

    let automation = state.store.create_automation(org, body).await?;
    tracing::info!(automation_id = %automation.id, organization_id = %org, "automation created");
    Ok((StatusCode::CREATED, Json(automation)))
}

/// GET /api/v1/automations
pub async fn list(State(state): State<AppState>, OrgId(org): OrgId) -> ApiResult<Json<Vec<Automation>>> {
    Ok(Json(state.store.list_automations(org).await?))
}

/// GET /api/v1/automations/:id
pub async fn get(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Automation>> {
    Ok(Json(state.store.get_automation_for_org(org, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody {
    pub status: AutomationStatus,
}

/// PATCH /api/v1/automations/:id/status
pub async fn update_status(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusBody>,
) -> ApiResult<Json<Automation>> {
    let automation = state.store.update_automation_status(org, id, body.status).await?;
    tracing::info!(automation_id = %id, status = %body.status, "automation status changed");
    Ok(Json(automation))
}

/// DELETE /api/v1/automations/:id
pub async fn delete(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.store.delete_automation(org, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub struct TriggerBody {
    pub contact_id: Option<Uuid>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// POST /api/v1/automations/:id/trigger
///
/// Starts one run regardless of the automation's status and trigger filters.
pub async fn trigger(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Path(id): Path<Uuid>,
    body: Option<Json<TriggerBody>>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let mut event = AutomationEvent::new(org, TriggerType::Manual, body.data);
    event.contact_id = body.contact_id;
    event.email = body.email;
    event.phone = body.phone;
    event.source = "manual".into();

    let run_id = state.bus.trigger_automation(org, id, &event).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "runId": run_id }))))
}

/// GET /api/v1/automations/:id/runs
pub async fn runs(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Path(id): Path<Uuid>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<Json<Vec<AutomationRun>>> {
    let runs = state.store.list_runs(org, id, query.resolve(50, 500)).await?;
    Ok(Json(runs))
}
