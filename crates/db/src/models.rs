//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models: they carry no domain behaviour.
//! Domain types live in the `engine` crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// automations
// ---------------------------------------------------------------------------

/// A persisted automation definition row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AutomationRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    /// `draft`, `active` or `paused`.
    pub status: String,
    pub trigger_type: String,
    pub trigger_config: serde_json::Value,
    /// JSON array of graph nodes.
    pub nodes: serde_json::Value,
    /// JSON array of graph edges.
    pub edges: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values needed to insert a new automation.
#[derive(Debug, Clone)]
pub struct NewAutomation {
    pub organization_id: Uuid,
    pub name: String,
    pub status: String,
    pub trigger_type: String,
    pub trigger_config: serde_json::Value,
    pub nodes: serde_json::Value,
    pub edges: serde_json::Value,
}

// ---------------------------------------------------------------------------
// automation_runs
// ---------------------------------------------------------------------------

/// A persisted automation run row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunRow {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub organization_id: Uuid,
    pub status: String,
    pub current_node_id: Option<String>,
    pub context: serde_json::Value,
    pub last_error: Option<String>,
    /// When a `waiting` run is due to resume.
    pub resume_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// run_steps
// ---------------------------------------------------------------------------

/// One executed node within a run (execution history).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunStepRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    pub output: Option<serde_json::Value>,
    pub status: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// event_log
// ---------------------------------------------------------------------------

/// A business event waiting for (or already through) dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct EventLogRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub event_type: String,
    pub contact_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub source: String,
    /// Producer-supplied business key used to suppress duplicates.
    pub dedupe_key: Option<String>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// credentials
// ---------------------------------------------------------------------------

/// A persisted third-party credential.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CredentialRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub key: String,
    /// AES-256-GCM encrypted value (base64-encoded nonce + ciphertext).
    pub encrypted_value: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// job_queue
// ---------------------------------------------------------------------------

/// A job row fetched from the queue table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub job_type: String,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub payload: serde_json::Value,
    /// The job is not visible to workers before this instant.
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// CRM collaborator tables
// ---------------------------------------------------------------------------

/// Internal notification shown to the team.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// A deal in a sales pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DealRow {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub pipeline_id: Option<Uuid>,
    pub stage_id: Option<Uuid>,
    pub title: String,
    pub value: Option<f64>,
    pub created_at: DateTime<Utc>,
}
