//! Workflow execution engine.
//!
//! `WorkflowExecutor` walks one run through its automation graph:
//! 1. Claims the run with a compare-and-set `{pending, waiting} → running`
//!    guarded by the node it is asked to execute; a lost claim is a
//!    duplicate delivery and a no-op.
//! 2. Executes nodes through the [`NodeRegistry`], merging each output
//!    fragment into the run context and persisting it after every step.
//! 3. Stops at a delay by parking the run in `waiting` and enqueueing a
//!    resume message, or finishes the run `completed` / `failed`.
//!
//! There is no in-engine retry: a node error fails the run.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use nodes::{CredentialStore, ExecutionContext, Next, NodeRegistry};
use queue::{JobQueue, StepMessage};

use crate::models::{Automation, AutomationRun, RunStatus, RunStep, StepStatus};
use crate::store::{AutomationStore, StoreError};
use crate::EngineError;

/// Ten years; keeps `now + delay` representable.
const MAX_DELAY_SECS: u64 = 315_360_000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Nodes executed in one invocation before the run is failed.  Breaks
    /// loop-back cycles that contain no delay.
    pub max_steps: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_steps: 500 }
    }
}

// ---------------------------------------------------------------------------
// Outcome of one invocation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The run was cancelled before this invocation started.
    RunCancelled,
    /// Another invocation owns the run, or it already moved past the node.
    NotClaimed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed { steps: usize },
    Suspended { node_id: String, resume_at: DateTime<Utc> },
    Failed { error: String },
    Cancelled,
    Skipped { reason: SkipReason },
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Shared, stateless orchestrator.  Construct one per process and call
/// [`WorkflowExecutor::execute_step`] for every delivery.
pub struct WorkflowExecutor {
    store: Arc<dyn AutomationStore>,
    registry: Arc<NodeRegistry>,
    queue: Arc<dyn JobQueue>,
    credentials: Option<CredentialStore>,
    config: ExecutorConfig,
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn AutomationStore>,
        registry: Arc<NodeRegistry>,
        queue: Arc<dyn JobQueue>,
        config: ExecutorConfig,
    ) -> Self {
        Self { store, registry, queue, credentials: None, config }
    }

    /// Decrypt organization credentials into each node's `secrets`.
    pub fn with_credentials(mut self, credentials: CredentialStore) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn store(&self) -> &Arc<dyn AutomationStore> {
        &self.store
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    /// Start a `pending` run at its current node.
    pub async fn start_run(&self, run_id: Uuid) -> Result<StepOutcome, EngineError> {
        let run = self.load_run(run_id).await?;
        let node_id = run.current_node_id.unwrap_or_default();
        self.execute_step(run_id, &node_id, None).await
    }

    /// Cancel a non-terminal run.  Returns `false` if it already finished.
    #[instrument(skip(self))]
    pub async fn cancel_run(&self, organization_id: Uuid, run_id: Uuid) -> Result<bool, EngineError> {
        self.store.get_run_for_org(organization_id, run_id).await.map_err(|e| match e {
            StoreError::NotFound => EngineError::RunNotFound(run_id),
            other => other.into(),
        })?;
        let cancelled = self.store.cancel_run(organization_id, run_id).await?;
        if cancelled {
            info!("run cancelled");
        }
        Ok(cancelled)
    }

    /// Execute the run from `node_id` until it completes, fails or reaches
    /// a delay.
    ///
    /// `context` is the one carried by a queue message.  The persisted run
    /// context wins; the message context is only used when the persisted
    /// one is empty.
    ///
    /// # Errors
    /// `RunNotFound` for an unknown run, and store errors.  Node failures
    /// are not errors: they fail the run and return [`StepOutcome::Failed`].
    #[instrument(skip(self, context))]
    pub async fn execute_step(
        &self,
        run_id: Uuid,
        node_id: &str,
        context: Option<Value>,
    ) -> Result<StepOutcome, EngineError> {
        let run = self.load_run(run_id).await?;

        if run.status == RunStatus::Cancelled {
            debug!("run cancelled; skipping");
            return Ok(StepOutcome::Skipped { reason: SkipReason::RunCancelled });
        }

        let automation = match self.store.get_automation(run.automation_id).await {
            Ok(automation) => automation,
            Err(StoreError::NotFound) => {
                let error = format!("automation {} not found", run.automation_id);
                self.store
                    .fail_run(run_id, &[RunStatus::Pending, RunStatus::Waiting], &error)
                    .await?;
                warn!(automation_id = %run.automation_id, "automation missing; run failed");
                return Ok(StepOutcome::Failed { error });
            }
            Err(e) => return Err(e.into()),
        };

        if !self
            .store
            .claim_run(run_id, &[RunStatus::Pending, RunStatus::Waiting], node_id)
            .await?
        {
            debug!(status = %run.status, "run not claimable; duplicate delivery");
            return Ok(StepOutcome::Skipped { reason: SkipReason::NotClaimed });
        }

        let mut data = match context {
            Some(message) if is_blank(&run.context) => message,
            _ => run.context.clone(),
        };
        let secrets = self.load_secrets(run.organization_id).await;

        match self.walk(&automation, &run, node_id, &mut data, &secrets).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(error = %e, "run aborted");
                if let Err(mark) = self.store.finish_run(run_id, RunStatus::Failed, &data, Some(&e.to_string())).await {
                    error!(error = %mark, "could not mark run failed");
                }
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    async fn load_run(&self, run_id: Uuid) -> Result<AutomationRun, EngineError> {
        self.store.get_run(run_id).await.map_err(|e| match e {
            StoreError::NotFound => EngineError::RunNotFound(run_id),
            other => other.into(),
        })
    }

    async fn load_secrets(&self, organization_id: Uuid) -> HashMap<String, String> {
        let Some(cipher) = &self.credentials else { return HashMap::new() };
        let stored = match self.store.list_credentials(organization_id).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "could not load credentials");
                return HashMap::new();
            }
        };
        stored
            .into_iter()
            .filter_map(|c| match cipher.decrypt(&c.encrypted_value) {
                Ok(secret) => Some((c.key, secret)),
                Err(e) => {
                    warn!(key = %c.key, error = %e, "could not decrypt credential");
                    None
                }
            })
            .collect()
    }

    /// The step loop.  Returns store/queue errors; everything else becomes
    /// a [`StepOutcome`].
    async fn walk(
        &self,
        automation: &Automation,
        run: &AutomationRun,
        start: &str,
        data: &mut Value,
        secrets: &HashMap<String, String>,
    ) -> Result<StepOutcome, EngineError> {
        let mut current = start.to_owned();
        let mut steps = 0usize;

        loop {
            if self.store.get_run(run.id).await?.status == RunStatus::Cancelled {
                info!(node_id = %current, "cancellation observed; stopping");
                return Ok(StepOutcome::Cancelled);
            }

            let Some(node) = automation.node(&current) else {
                return self.complete(run.id, data, steps).await;
            };

            if steps >= self.config.max_steps {
                let error = format!("step limit of {} exceeded at node '{}'", self.config.max_steps, node.id);
                return self.fail(run.id, data, error).await;
            }

            let Some(executor) = self.registry.get(&node.node_type) else {
                let error = format!("node '{}': unknown node type '{}'", node.id, node.node_type);
                return self.fail(run.id, data, error).await;
            };

            let ctx = ExecutionContext {
                organization_id: run.organization_id,
                automation_id: automation.id,
                run_id: run.id,
                node_id: node.id.clone(),
                data: data.clone(),
                secrets: secrets.clone(),
            };

            let started_at = Utc::now();
            let outcome = executor.execute(&node.data.config, &ctx).await;
            steps += 1;

            let outcome = match outcome {
                Ok(outcome) => {
                    self.record(run.id, node, Some(Value::Object(outcome.output.clone())), None, started_at)
                        .await?;
                    outcome
                }
                Err(e) => {
                    let error = format!("node '{}' ({}): {e}", node.id, node.node_type);
                    self.record(run.id, node, None, Some(&error), started_at).await?;
                    return self.fail(run.id, data, error).await;
                }
            };

            debug!(node_id = %node.id, node_type = %node.node_type, "node executed");
            merge(data, outcome.output);

            let next = match &outcome.next {
                Next::Branch(label) => automation.next_node_id(&node.id, Some(label.as_str())),
                Next::Continue | Next::Suspend { .. } => automation.next_node_id(&node.id, None),
            };
            let Some(next) = next else {
                return self.complete(run.id, data, steps).await;
            };

            if let Next::Suspend { delay_seconds } = outcome.next {
                if delay_seconds > 0 {
                    return self.suspend(run.id, next, data, delay_seconds).await;
                }
            }

            if !self.store.save_progress(run.id, next, data).await? {
                info!("run left `running` mid-walk; stopping");
                return Ok(StepOutcome::Cancelled);
            }
            current = next.to_owned();
        }
    }

    async fn record(
        &self,
        run_id: Uuid,
        node: &crate::models::Node,
        output: Option<Value>,
        error: Option<&str>,
        started_at: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        let step = RunStep {
            id: Uuid::new_v4(),
            run_id,
            node_id: node.id.clone(),
            node_type: node.node_type.clone(),
            output,
            status: if error.is_some() { StepStatus::Failed } else { StepStatus::Succeeded },
            error: error.map(str::to_owned),
            started_at,
            finished_at: Utc::now(),
        };
        Ok(self.store.record_step(&step).await?)
    }

    async fn suspend(
        &self,
        run_id: Uuid,
        next: &str,
        data: &Value,
        delay_seconds: u64,
    ) -> Result<StepOutcome, EngineError> {
        let delay = chrono::Duration::seconds(delay_seconds.min(MAX_DELAY_SECS) as i64);
        let resume_at = Utc::now() + delay;

        if !self.store.suspend_run(run_id, next, data, resume_at).await? {
            info!("run left `running` before suspending; stopping");
            return Ok(StepOutcome::Cancelled);
        }

        let message = StepMessage { run_id, node_id: next.to_owned(), context: data.clone() };
        match message.enqueue(self.queue.as_ref(), delay_seconds).await {
            Ok(()) => info!(next_node = next, delay_seconds, "run suspended"),
            // The due-waits sweep picks the run up once `resume_at` passes.
            Err(e) => error!(next_node = next, error = %e, "resume enqueue failed; left to sweep"),
        }

        Ok(StepOutcome::Suspended { node_id: next.to_owned(), resume_at })
    }

    async fn complete(&self, run_id: Uuid, data: &Value, steps: usize) -> Result<StepOutcome, EngineError> {
        if !self.store.finish_run(run_id, RunStatus::Completed, data, None).await? {
            info!("run left `running` before completion");
            return Ok(StepOutcome::Cancelled);
        }
        info!(steps, "run completed");
        Ok(StepOutcome::Completed { steps })
    }

    async fn fail(&self, run_id: Uuid, data: &Value, error: String) -> Result<StepOutcome, EngineError> {
        warn!(%error, "run failed");
        if !self.store.finish_run(run_id, RunStatus::Failed, data, Some(&error)).await? {
            return Ok(StepOutcome::Cancelled);
        }
        Ok(StepOutcome::Failed { error })
    }
}

/// Shallow merge; later keys override.
fn merge(data: &mut Value, fragment: Map<String, Value>) {
    if fragment.is_empty() {
        return;
    }
    if !data.is_object() {
        *data = Value::Object(Map::new());
    }
    if let Value::Object(map) = data {
        map.extend(fragment);
    }
}

fn is_blank(context: &Value) -> bool {
    match context {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}
