//! Polling fallback that drives stalled work forward.
//!
//! Each sweep handles its rows independently: one bad row is counted and
//! logged, the rest still run.  Sweeps are safe to run concurrently with
//! each other and with queue delivery: events are claimed before dispatch
//! and every resume goes through the executor's claim.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::bus::EventBus;
use crate::executor::{StepOutcome, WorkflowExecutor};
use crate::store::AutomationStore;
use crate::EngineError;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Pending runs younger than this are left to their own dispatch.
    pub pending_debounce: Duration,
    /// How overdue a waiting run must be before the sweep resumes it.
    pub wait_grace: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self { pending_debounce: Duration::from_secs(10), wait_grace: Duration::from_secs(60) }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub processed: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl SweepReport {
    fn failure(&mut self, error: String) {
        warn!(%error, "sweep item failed");
        self.failed += 1;
        self.errors.push(error);
    }
}

pub struct EventProcessor {
    store: Arc<dyn AutomationStore>,
    bus: Arc<EventBus>,
    executor: Arc<WorkflowExecutor>,
    config: ProcessorConfig,
}

fn ago(window: Duration) -> chrono::DateTime<Utc> {
    Utc::now() - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero())
}

impl EventProcessor {
    pub fn new(bus: Arc<EventBus>, config: ProcessorConfig) -> Self {
        let executor = bus.executor().clone();
        Self { store: executor.store().clone(), bus, executor, config }
    }

    /// Claim unprocessed Event Log entries and emit each one.  Claiming
    /// marks an entry processed before dispatch, so overlapping sweeps never
    /// emit the same entry twice.  A dispatch error is recorded on the entry.
    #[instrument(skip(self))]
    pub async fn process_pending_events(&self, limit: i64) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();

        for entry in self.store.claim_unprocessed_events(limit).await? {
            let error = match entry.to_event() {
                Ok(event) => match self.bus.emit(&event).await {
                    Ok(emitted) if emitted.errors.is_empty() => None,
                    Ok(emitted) => Some(emitted.errors.join("; ")),
                    Err(e) => Some(e.to_string()),
                },
                Err(e) => Some(e.to_string()),
            };

            let Some(error) = error else {
                report.processed += 1;
                continue;
            };
            if let Err(e) = self.store.record_event_error(entry.id, &error).await {
                warn!(event_id = %entry.id, error = %e, "could not record event error");
            }
            report.failure(format!("event {}: {error}", entry.id));
        }

        info!(processed = report.processed, failed = report.failed, "event sweep finished");
        Ok(report)
    }

    /// Start `pending` runs older than the debounce window.
    #[instrument(skip(self))]
    pub async fn process_pending_runs(&self, limit: i64) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();

        for run in self.store.list_pending_runs(ago(self.config.pending_debounce), limit).await? {
            match self.executor.start_run(run.id).await {
                Ok(outcome) => self.tally(&mut report, run.id, outcome),
                Err(e) => report.failure(format!("run {}: {e}", run.id)),
            }
        }

        info!(processed = report.processed, failed = report.failed, "pending-run sweep finished");
        Ok(report)
    }

    /// Resume `waiting` runs whose resume time passed more than the grace
    /// period ago.
    #[instrument(skip(self))]
    pub async fn process_due_waits(&self, limit: i64) -> Result<SweepReport, EngineError> {
        let mut report = SweepReport::default();

        for run in self.store.list_due_waiting_runs(ago(self.config.wait_grace), limit).await? {
            let node_id = run.current_node_id.clone().unwrap_or_default();
            match self.executor.execute_step(run.id, &node_id, None).await {
                Ok(outcome) => self.tally(&mut report, run.id, outcome),
                Err(e) => report.failure(format!("run {}: {e}", run.id)),
            }
        }

        info!(processed = report.processed, failed = report.failed, "due-wait sweep finished");
        Ok(report)
    }

    fn tally(&self, report: &mut SweepReport, run_id: uuid::Uuid, outcome: StepOutcome) {
        match outcome {
            StepOutcome::Failed { error } => report.failure(format!("run {run_id}: {error}")),
            _ => report.processed += 1,
        }
    }
}
