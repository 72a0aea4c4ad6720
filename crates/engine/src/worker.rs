//! Job dispatch shared by the queue delivery endpoint and the Postgres
//! job worker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use queue::{PgJobQueue, QueueError, StepMessage, AUTOMATION_STEP};

use crate::executor::{StepOutcome, WorkflowExecutor};
use crate::EngineError;

/// Hand a delivered job to the engine.
///
/// # Errors
/// `UnsupportedJob` for unknown job types, `InvalidPayload` for a payload
/// that is not a step message, plus whatever the executor returns.
pub async fn dispatch_job(
    executor: &WorkflowExecutor,
    job_type: &str,
    payload: Value,
) -> Result<StepOutcome, EngineError> {
    if job_type != AUTOMATION_STEP {
        return Err(EngineError::UnsupportedJob(job_type.to_owned()));
    }
    let message: StepMessage = serde_json::from_value(payload)?;
    executor.execute_step(message.run_id, &message.node_id, Some(message.context)).await
}

/// Drains the `job_queue` table.
pub struct JobWorker {
    queue: PgJobQueue,
    executor: Arc<WorkflowExecutor>,
    poll_interval: Duration,
}

impl JobWorker {
    pub fn new(queue: PgJobQueue, executor: Arc<WorkflowExecutor>, poll_interval: Duration) -> Self {
        Self { queue, executor, poll_interval }
    }

    /// Claim and execute one due job.  Returns `false` when none was due.
    pub async fn run_once(&self) -> Result<bool, QueueError> {
        let Some(job) = self.queue.claim_next().await? else {
            return Ok(false);
        };
        debug!(job_id = %job.id, job_type = %job.job_type, attempt = job.attempts, "job claimed");

        match dispatch_job(&self.executor, &job.job_type, job.payload.clone()).await {
            Ok(outcome) => {
                debug!(job_id = %job.id, ?outcome, "job done");
                self.queue.complete(job.id).await?;
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "job failed");
                self.queue.fail(&job, &e.to_string()).await?;
            }
        }
        Ok(true)
    }

    /// Poll until `shutdown` flips to `true`.  Drains back-to-back while
    /// jobs are due and sleeps `poll_interval` otherwise.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval = ?self.poll_interval, "job worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let idle = match self.run_once().await {
                Ok(worked) => !worked,
                Err(e) => {
                    error!(error = %e, "job worker poll failed");
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
        info!("job worker stopped");
    }
}
