//! Postgres-backed store and CRM, built on the `db` repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use db::models::{AutomationRow, EventLogRow, RunRow, RunStepRow};
use db::repository::{automations, credentials, crm, events, runs};
use db::{DbError, DbPool};
use nodes::services::NewDeal;
use nodes::{CrmServices, ServiceError};

use super::{AutomationStore, StoreError, StoredCredential};
use crate::models::{
    Automation, AutomationEvent, AutomationRun, AutomationStatus, EventLogEntry, NewAutomation, RunStatus, RunStep,
    TriggerType,
};

// ---------------------------------------------------------------------------
// Row → domain conversions
// ---------------------------------------------------------------------------

fn corrupt(what: &str, id: Uuid, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("{what} {id}: {err}"))
}

impl TryFrom<AutomationRow> for Automation {
    type Error = StoreError;

    fn try_from(row: AutomationRow) -> Result<Self, Self::Error> {
        let id = row.id;
        Ok(Self {
            id,
            organization_id: row.organization_id,
            name: row.name,
            status: row.status.parse().map_err(|e| corrupt("automation", id, e))?,
            trigger_type: row.trigger_type.parse().map_err(|e| corrupt("automation", id, e))?,
            trigger_config: row.trigger_config,
            nodes: serde_json::from_value(row.nodes).map_err(|e| corrupt("automation", id, e))?,
            edges: serde_json::from_value(row.edges).map_err(|e| corrupt("automation", id, e))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<RunRow> for AutomationRun {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            automation_id: row.automation_id,
            organization_id: row.organization_id,
            status: row.status.parse().map_err(|e| corrupt("run", row.id, e))?,
            current_node_id: row.current_node_id,
            context: row.context,
            last_error: row.last_error,
            resume_at: row.resume_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

impl TryFrom<RunStepRow> for RunStep {
    type Error = StoreError;

    fn try_from(row: RunStepRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            run_id: row.run_id,
            node_id: row.node_id,
            node_type: row.node_type,
            output: row.output,
            status: row.status.parse().map_err(|e| corrupt("run step", row.id, e))?,
            error: row.error,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

impl From<EventLogRow> for EventLogEntry {
    fn from(row: EventLogRow) -> Self {
        Self {
            id: row.id,
            organization_id: row.organization_id,
            event_type: row.event_type,
            contact_id: row.contact_id,
            payload: row.payload,
            source: row.source,
            dedupe_key: row.dedupe_key,
            processed: row.processed,
            processed_at: row.processed_at,
            error: row.error,
            created_at: row.created_at,
        }
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

fn status_names(statuses: &[RunStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_owned()).collect()
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl AutomationStore for PgStore {
    async fn create_automation(&self, organization_id: Uuid, new: NewAutomation) -> Result<Automation, StoreError> {
        let row = automations::create_automation(
            &self.pool,
            db::models::NewAutomation {
                organization_id,
                name: new.name,
                status: new.status.as_str().to_owned(),
                trigger_type: new.trigger_type.as_str().to_owned(),
                trigger_config: new.trigger_config,
                nodes: to_json(&new.nodes)?,
                edges: to_json(&new.edges)?,
            },
        )
        .await?;
        row.try_into()
    }

    async fn get_automation(&self, id: Uuid) -> Result<Automation, StoreError> {
        automations::get_automation(&self.pool, id).await?.try_into()
    }

    async fn get_automation_for_org(&self, organization_id: Uuid, id: Uuid) -> Result<Automation, StoreError> {
        automations::get_automation_for_org(&self.pool, organization_id, id).await?.try_into()
    }

    async fn list_automations(&self, organization_id: Uuid) -> Result<Vec<Automation>, StoreError> {
        convert_all(automations::list_automations(&self.pool, organization_id).await?)
    }

    async fn list_active_by_trigger(
        &self,
        organization_id: Uuid,
        trigger_type: TriggerType,
    ) -> Result<Vec<Automation>, StoreError> {
        convert_all(automations::list_active_by_trigger(&self.pool, organization_id, trigger_type.as_str()).await?)
    }

    async fn update_automation_status(
        &self,
        organization_id: Uuid,
        id: Uuid,
        status: AutomationStatus,
    ) -> Result<Automation, StoreError> {
        automations::update_automation_status(&self.pool, organization_id, id, status.as_str())
            .await?
            .try_into()
    }

    async fn delete_automation(&self, organization_id: Uuid, id: Uuid) -> Result<(), StoreError> {
        Ok(automations::delete_automation(&self.pool, organization_id, id).await?)
    }

    async fn create_run(&self, run: &AutomationRun) -> Result<AutomationRun, StoreError> {
        let start = run.current_node_id.as_deref().unwrap_or_default();
        runs::create_run(&self.pool, run.id, run.automation_id, run.organization_id, start, &run.context)
            .await?
            .try_into()
    }

    async fn get_run(&self, id: Uuid) -> Result<AutomationRun, StoreError> {
        runs::get_run(&self.pool, id).await?.try_into()
    }

    async fn get_run_for_org(&self, organization_id: Uuid, id: Uuid) -> Result<AutomationRun, StoreError> {
        runs::get_run_for_org(&self.pool, organization_id, id).await?.try_into()
    }

    async fn list_runs(
        &self,
        organization_id: Uuid,
        automation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<AutomationRun>, StoreError> {
        convert_all(runs::list_runs_for_automation(&self.pool, organization_id, automation_id, limit).await?)
    }

    async fn list_pending_runs(&self, created_before: DateTime<Utc>, limit: i64) -> Result<Vec<AutomationRun>, StoreError> {
        convert_all(runs::list_pending_runs(&self.pool, created_before, limit).await?)
    }

    async fn list_due_waiting_runs(&self, due_before: DateTime<Utc>, limit: i64) -> Result<Vec<AutomationRun>, StoreError> {
        convert_all(runs::list_due_waiting_runs(&self.pool, due_before, limit).await?)
    }

    async fn claim_run(&self, id: Uuid, from: &[RunStatus], node_id: &str) -> Result<bool, StoreError> {
        Ok(runs::claim_run(&self.pool, id, &status_names(from), node_id).await?)
    }

    async fn save_progress(&self, id: Uuid, node_id: &str, context: &Value) -> Result<bool, StoreError> {
        Ok(runs::save_progress(&self.pool, id, node_id, context).await?)
    }

    async fn suspend_run(
        &self,
        id: Uuid,
        next_node_id: &str,
        context: &Value,
        resume_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(runs::suspend_run(&self.pool, id, next_node_id, context, resume_at).await?)
    }

    async fn finish_run(
        &self,
        id: Uuid,
        status: RunStatus,
        context: &Value,
        last_error: Option<&str>,
    ) -> Result<bool, StoreError> {
        Ok(runs::finish_run(&self.pool, id, status.as_str(), context, last_error).await?)
    }

    async fn fail_run(&self, id: Uuid, from: &[RunStatus], last_error: &str) -> Result<bool, StoreError> {
        Ok(runs::fail_run(&self.pool, id, &status_names(from), last_error).await?)
    }

    async fn cancel_run(&self, organization_id: Uuid, id: Uuid) -> Result<bool, StoreError> {
        Ok(runs::cancel_run(&self.pool, organization_id, id).await?)
    }

    async fn record_step(&self, step: &RunStep) -> Result<(), StoreError> {
        runs::insert_step(
            &self.pool,
            step.run_id,
            &step.node_id,
            &step.node_type,
            step.output.as_ref(),
            step.status.as_str(),
            step.error.as_deref(),
            step.started_at,
        )
        .await?;
        Ok(())
    }

    async fn list_steps(&self, run_id: Uuid) -> Result<Vec<RunStep>, StoreError> {
        convert_all(runs::list_steps(&self.pool, run_id).await?)
    }

    async fn record_event(
        &self,
        event: &AutomationEvent,
        dedupe_key: Option<&str>,
    ) -> Result<Option<EventLogEntry>, StoreError> {
        let row = events::insert_event_dedup(
            &self.pool,
            event.organization_id,
            event.event_type.as_str(),
            event.contact_id,
            &event.log_payload(),
            &event.source,
            dedupe_key,
        )
        .await?;
        Ok(row.map(EventLogEntry::from))
    }

    async fn claim_unprocessed_events(&self, limit: i64) -> Result<Vec<EventLogEntry>, StoreError> {
        let rows = events::claim_unprocessed(&self.pool, limit).await?;
        Ok(rows.into_iter().map(EventLogEntry::from).collect())
    }

    async fn record_event_error(&self, id: Uuid, error: &str) -> Result<(), StoreError> {
        Ok(events::record_error(&self.pool, id, error).await?)
    }

    async fn list_credentials(&self, organization_id: Uuid) -> Result<Vec<StoredCredential>, StoreError> {
        let rows = credentials::list_credentials(&self.pool, organization_id).await?;
        Ok(rows
            .into_iter()
            .map(|row| StoredCredential { key: row.key, encrypted_value: row.encrypted_value })
            .collect())
    }

    async fn upsert_credential(&self, organization_id: Uuid, key: &str, encrypted_value: &str) -> Result<(), StoreError> {
        credentials::upsert_credential(&self.pool, organization_id, key, encrypted_value).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PgCrm
// ---------------------------------------------------------------------------

/// [`CrmServices`] over the platform's `contacts`, `notifications` and
/// `deals` tables.
#[derive(Clone)]
pub struct PgCrm {
    pool: DbPool,
}

impl PgCrm {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// `false` from a conditional tag update means either "no change" or
    /// "no such contact"; this tells them apart.
    async fn ensure_contact(&self, organization_id: Uuid, contact_id: Uuid) -> Result<(), ServiceError> {
        crm::get_contact_tags(&self.pool, organization_id, contact_id)
            .await
            .map(|_| ())
            .map_err(|e| service_error(e, "contact"))
    }
}

fn service_error(err: DbError, what: &str) -> ServiceError {
    match err {
        DbError::NotFound(_) => ServiceError::NotFound(what.to_owned()),
        other => ServiceError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl CrmServices for PgCrm {
    async fn add_tag(&self, organization_id: Uuid, contact_id: Uuid, tag: &str) -> Result<bool, ServiceError> {
        let added = crm::add_contact_tag(&self.pool, organization_id, contact_id, tag)
            .await
            .map_err(|e| service_error(e, "contact"))?;
        if !added {
            self.ensure_contact(organization_id, contact_id).await?;
        }
        Ok(added)
    }

    async fn remove_tag(&self, organization_id: Uuid, contact_id: Uuid, tag: &str) -> Result<bool, ServiceError> {
        let removed = crm::remove_contact_tag(&self.pool, organization_id, contact_id, tag)
            .await
            .map_err(|e| service_error(e, "contact"))?;
        if !removed {
            self.ensure_contact(organization_id, contact_id).await?;
        }
        Ok(removed)
    }

    async fn create_notification(&self, organization_id: Uuid, title: &str, message: &str) -> Result<Uuid, ServiceError> {
        let row = crm::insert_notification(&self.pool, organization_id, title, message)
            .await
            .map_err(|e| service_error(e, "notification"))?;
        Ok(row.id)
    }

    async fn create_deal(&self, organization_id: Uuid, deal: NewDeal) -> Result<Uuid, ServiceError> {
        let row = crm::insert_deal(
            &self.pool,
            organization_id,
            deal.contact_id,
            deal.pipeline_id,
            deal.stage_id,
            &deal.title,
            deal.value,
        )
        .await
        .map_err(|e| service_error(e, "deal"))?;
        Ok(row.id)
    }

    async fn move_deal(&self, organization_id: Uuid, deal_id: Uuid, stage_id: Uuid) -> Result<(), ServiceError> {
        crm::move_deal(&self.pool, organization_id, deal_id, stage_id)
            .await
            .map_err(|e| service_error(e, "deal"))
    }
}
