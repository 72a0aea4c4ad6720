//! Persistence seam of the engine.
//!
//! [`AutomationStore`] is everything the bus, executor and processor need
//! from storage.  [`PgStore`] maps it onto the `db` repositories;
//! [`MemoryStore`] keeps the same compare-and-set semantics in a mutex for
//! tests and local tooling.
//!
//! Every run status transition is conditional on the current status and
//! reports whether this caller won it.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use db::DbError;

use crate::models::{
    Automation, AutomationEvent, AutomationRun, AutomationStatus, EventLogEntry, NewAutomation, RunStatus, RunStep,
    TriggerType,
};

pub use memory::MemoryStore;
pub use postgres::{PgCrm, PgStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error(transparent)]
    Db(DbError),

    /// A persisted row no longer parses into its domain type.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(_) => Self::NotFound,
            other => Self::Db(other),
        }
    }
}

/// A credential as stored: name plus encrypted value.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredential {
    pub key: String,
    pub encrypted_value: String,
}

#[async_trait]
pub trait AutomationStore: Send + Sync {
    // ---- automations ----

    async fn create_automation(&self, organization_id: Uuid, new: NewAutomation) -> Result<Automation, StoreError>;

    /// Unscoped lookup, used when resuming a run by id.
    async fn get_automation(&self, id: Uuid) -> Result<Automation, StoreError>;

    async fn get_automation_for_org(&self, organization_id: Uuid, id: Uuid) -> Result<Automation, StoreError>;

    async fn list_automations(&self, organization_id: Uuid) -> Result<Vec<Automation>, StoreError>;

    /// `active` automations of the organization listening for `trigger_type`.
    async fn list_active_by_trigger(
        &self,
        organization_id: Uuid,
        trigger_type: TriggerType,
    ) -> Result<Vec<Automation>, StoreError>;

    async fn update_automation_status(
        &self,
        organization_id: Uuid,
        id: Uuid,
        status: AutomationStatus,
    ) -> Result<Automation, StoreError>;

    /// Delete the automation and, with it, its runs.
    async fn delete_automation(&self, organization_id: Uuid, id: Uuid) -> Result<(), StoreError>;

    // ---- runs ----

    async fn create_run(&self, run: &AutomationRun) -> Result<AutomationRun, StoreError>;

    async fn get_run(&self, id: Uuid) -> Result<AutomationRun, StoreError>;

    async fn get_run_for_org(&self, organization_id: Uuid, id: Uuid) -> Result<AutomationRun, StoreError>;

    /// Newest first.
    async fn list_runs(&self, organization_id: Uuid, automation_id: Uuid, limit: i64)
        -> Result<Vec<AutomationRun>, StoreError>;

    /// `pending` runs created before `created_before`, oldest first.
    async fn list_pending_runs(&self, created_before: DateTime<Utc>, limit: i64)
        -> Result<Vec<AutomationRun>, StoreError>;

    /// `waiting` runs due before `due_before`, earliest first.
    async fn list_due_waiting_runs(&self, due_before: DateTime<Utc>, limit: i64)
        -> Result<Vec<AutomationRun>, StoreError>;

    /// `from → running`, guarded by `current_node_id` being `node_id` or unset.
    async fn claim_run(&self, id: Uuid, from: &[RunStatus], node_id: &str) -> Result<bool, StoreError>;

    /// Persist position and context of a `running` run.
    async fn save_progress(&self, id: Uuid, node_id: &str, context: &Value) -> Result<bool, StoreError>;

    /// `running → waiting`, positioned at `next_node_id`.
    async fn suspend_run(
        &self,
        id: Uuid,
        next_node_id: &str,
        context: &Value,
        resume_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// `running → completed | failed`.
    async fn finish_run(
        &self,
        id: Uuid,
        status: RunStatus,
        context: &Value,
        last_error: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// `from → failed` for runs that never reached `running`.
    async fn fail_run(&self, id: Uuid, from: &[RunStatus], last_error: &str) -> Result<bool, StoreError>;

    /// Any non-terminal status `→ cancelled`.
    async fn cancel_run(&self, organization_id: Uuid, id: Uuid) -> Result<bool, StoreError>;

    // ---- steps ----

    async fn record_step(&self, step: &RunStep) -> Result<(), StoreError>;

    async fn list_steps(&self, run_id: Uuid) -> Result<Vec<RunStep>, StoreError>;

    // ---- event log ----

    /// Insert an Event Log entry.  `None` when an unprocessed entry with the
    /// same `(organization_id, event_type, dedupe_key)` already exists.
    async fn record_event(
        &self,
        event: &AutomationEvent,
        dedupe_key: Option<&str>,
    ) -> Result<Option<EventLogEntry>, StoreError>;

    /// Take up to `limit` unprocessed entries, oldest first, marking them
    /// processed.  An entry is handed to at most one caller.
    async fn claim_unprocessed_events(&self, limit: i64) -> Result<Vec<EventLogEntry>, StoreError>;

    async fn record_event_error(&self, id: Uuid, error: &str) -> Result<(), StoreError>;

    // ---- credentials ----

    async fn list_credentials(&self, organization_id: Uuid) -> Result<Vec<StoredCredential>, StoreError>;

    async fn upsert_credential(&self, organization_id: Uuid, key: &str, encrypted_value: &str)
        -> Result<(), StoreError>;
}
