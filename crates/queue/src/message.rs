//! Wire format of queue deliveries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{JobQueue, QueueError};

/// Job type of an engine resume message.
pub const AUTOMATION_STEP: &str = "automation_step";

/// Body POSTed to the delivery endpoint: `{"type": ..., "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEnvelope {
    #[serde(rename = "type")]
    pub job_type: String,
    pub data: Value,
}

/// Resume a run at `node_id` with the persisted `context`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepMessage {
    pub run_id: Uuid,
    pub node_id: String,
    #[serde(default)]
    pub context: Value,
}

impl StepMessage {
    /// Enqueue this message as an `automation_step` job.
    pub async fn enqueue(&self, queue: &dyn JobQueue, delay_seconds: u64) -> Result<(), QueueError> {
        queue.enqueue(AUTOMATION_STEP, &serde_json::to_value(self)?, delay_seconds).await
    }
}
