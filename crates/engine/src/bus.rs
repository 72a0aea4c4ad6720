//! Event Bus: business events in, automation runs out.

use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use queue::StepMessage;

use crate::executor::WorkflowExecutor;
use crate::models::{Automation, AutomationEvent, AutomationRun, EventLogEntry};
use crate::store::{AutomationStore, StoreError};
use crate::triggers::{matches_trigger, seed_context};
use crate::EngineError;

/// How the first step of a new run is dispatched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispatchMode {
    /// Execute through the engine before `emit` returns.
    #[default]
    Inline,
    /// Enqueue an immediate `automation_step` job.
    Queued,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(Self::Inline),
            "queued" | "queue" => Ok(Self::Queued),
            other => Err(format!("unknown dispatch mode '{other}' (expected inline or queued)")),
        }
    }
}

/// Runs created by one emission.  `errors` holds one entry per matching
/// automation whose run could not be created.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmitReport {
    pub matched: usize,
    pub run_ids: Vec<Uuid>,
    pub errors: Vec<String>,
}

pub struct EventBus {
    store: Arc<dyn AutomationStore>,
    executor: Arc<WorkflowExecutor>,
    mode: DispatchMode,
}

impl EventBus {
    pub fn new(executor: Arc<WorkflowExecutor>, mode: DispatchMode) -> Self {
        Self { store: executor.store().clone(), executor, mode }
    }

    pub fn executor(&self) -> &Arc<WorkflowExecutor> {
        &self.executor
    }

    /// Match `event` against the organization's active automations and
    /// start a run for each match.
    ///
    /// Each automation is handled on its own: a run that cannot be created
    /// is logged and reported, the remaining matches still start.  Only
    /// loading the automations fails the emission.
    #[instrument(skip(self, event), fields(organization_id = %event.organization_id, event_type = %event.event_type))]
    pub async fn emit(&self, event: &AutomationEvent) -> Result<EmitReport, EngineError> {
        let automations = self.store.list_active_by_trigger(event.organization_id, event.event_type).await?;
        let mut report = EmitReport::default();

        for automation in &automations {
            match matches_trigger(automation.trigger_type, &automation.trigger_config, event) {
                Ok(true) => {}
                Ok(false) => {
                    debug!(automation_id = %automation.id, "trigger filter did not match");
                    continue;
                }
                Err(e) => {
                    warn!(automation_id = %automation.id, error = %e, "malformed trigger config; skipping");
                    continue;
                }
            }

            report.matched += 1;
            match self.start_automation(automation, event).await {
                Ok(Some(run_id)) => report.run_ids.push(run_id),
                Ok(None) => {}
                Err(e) => {
                    error!(automation_id = %automation.id, error = %e, "could not start run");
                    report.errors.push(format!("automation {}: {e}", automation.id));
                }
            }
        }

        info!(
            candidates = automations.len(),
            runs = report.run_ids.len(),
            failed = report.errors.len(),
            "event emitted"
        );
        Ok(report)
    }

    /// Fire-and-forget emission.  Errors go to the log, never to the caller.
    pub fn publish(self: &Arc<Self>, event: AutomationEvent) -> tokio::task::JoinHandle<()> {
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = bus.emit(&event).await {
                error!(
                    organization_id = %event.organization_id,
                    event_type = %event.event_type,
                    error = %e,
                    "event emission failed"
                );
            }
        })
    }

    /// Append `event` to the Event Log for the processor sweep.  `None`
    /// when an unprocessed entry with the same dedupe key exists.
    pub async fn record_event(
        &self,
        event: &AutomationEvent,
        dedupe_key: Option<&str>,
    ) -> Result<Option<EventLogEntry>, EngineError> {
        let entry = self.store.record_event(event, dedupe_key).await?;
        if entry.is_none() {
            debug!(event_type = %event.event_type, ?dedupe_key, "duplicate event suppressed");
        }
        Ok(entry)
    }

    /// Start one run of a specific automation, bypassing trigger matching.
    pub async fn trigger_automation(
        &self,
        organization_id: Uuid,
        automation_id: Uuid,
        event: &AutomationEvent,
    ) -> Result<Uuid, EngineError> {
        let automation = self
            .store
            .get_automation_for_org(organization_id, automation_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => EngineError::AutomationNotFound(automation_id),
                other => other.into(),
            })?;
        self.start_automation(&automation, event)
            .await?
            .ok_or(EngineError::MissingStartNode)
    }

    async fn start_automation(&self, automation: &Automation, event: &AutomationEvent) -> Result<Option<Uuid>, EngineError> {
        let Some(start) = automation.start_node() else {
            warn!(automation_id = %automation.id, "automation has no start node; skipping");
            return Ok(None);
        };

        let run_id = Uuid::new_v4();
        let context = seed_context(event, automation.id, run_id);
        let run = self
            .store
            .create_run(&AutomationRun::pending(run_id, automation, &start.id, context))
            .await?;
        debug!(%run_id, automation_id = %automation.id, "run created");

        match self.mode {
            DispatchMode::Inline => {
                if let Err(e) = self.executor.start_run(run_id).await {
                    error!(%run_id, error = %e, "inline dispatch failed");
                }
            }
            DispatchMode::Queued => {
                let message = StepMessage { run_id, node_id: start.id.clone(), context: run.context };
                // A pending run that never gets its message is picked up by
                // the pending-runs sweep.
                if let Err(e) = message.enqueue(self.executor.queue().as_ref(), 0).await {
                    error!(%run_id, error = %e, "enqueue of first step failed");
                }
            }
        }
        Ok(Some(run_id))
    }
}
