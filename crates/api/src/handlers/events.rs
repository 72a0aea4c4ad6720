//! Event ingestion.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use engine::{AutomationEvent, EmitReport, TriggerType};

use crate::error::ApiResult;
use crate::handlers::OrgId;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventBody {
    #[serde(rename = "type", alias = "event_type")]
    pub event_type: TriggerType,
    pub contact_id: Option<Uuid>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub data: Value,
    pub source: Option<String>,
    /// Only used by the Event Log endpoint.
    pub dedupe_key: Option<String>,
}

impl EventBody {
    fn into_event(self, organization_id: Uuid) -> (AutomationEvent, Option<String>) {
        let mut event = AutomationEvent::new(organization_id, self.event_type, self.data);
        event.contact_id = self.contact_id;
        event.email = self.email;
        event.phone = self.phone;
        if let Some(source) = self.source {
            event.source = source;
        }
        (event, self.dedupe_key)
    }
}

/// POST /api/v1/events
///
/// Matches and starts runs before responding.  Failures of individual runs
/// are recorded on the runs, not reported here.
pub async fn emit(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Json(body): Json<EventBody>,
) -> ApiResult<(StatusCode, Json<EmitReport>)> {
    let (event, _) = body.into_event(org);
    let report = state.bus.emit(&event).await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

/// POST /api/v1/events/log
///
/// Appends the event to the Event Log for the next sweep.  A repeated
/// `dedupe_key` is accepted but not recorded twice.
pub async fn record(
    State(state): State<AppState>,
    OrgId(org): OrgId,
    Json(body): Json<EventBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let (event, dedupe_key) = body.into_event(org);
    let entry = state.bus.record_event(&event, dedupe_key.as_deref()).await?;
    let body = match entry {
        Some(entry) => json!({ "recorded": true, "id": entry.id }),
        None => json!({ "recorded": false, "duplicate": true }),
    };
    Ok((StatusCode::ACCEPTED, Json(body)))
}
