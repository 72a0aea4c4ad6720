//! The `ExecutableNode` trait: the contract every node must fulfil.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::NodeError;

/// Shared context passed to every node during execution.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Tenant that owns the automation; every side effect is scoped to it.
    pub organization_id: Uuid,
    /// ID of the parent automation.
    pub automation_id: Uuid,
    /// ID of the current run.
    pub run_id: Uuid,
    /// ID of the node being executed.
    pub node_id: String,
    /// Accumulated run context: trigger payload merged with every earlier
    /// node's output.
    pub data: Value,
    /// Decrypted credentials of the organization, keyed by credential name.
    pub secrets: HashMap<String, String>,
}

impl ExecutionContext {
    /// `contact_id` of the run, if the trigger carried one.
    pub fn contact_id(&self) -> Option<Uuid> {
        self.data
            .get("contact_id")
            .and_then(Value::as_str)
            .and_then(|s| Uuid::parse_str(s).ok())
    }
}

/// Where the engine should go after a node finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    /// Follow the single unconditional outgoing edge.
    Continue,
    /// Follow the edge whose `sourceHandle` equals the label.
    Branch(String),
    /// Persist the run and resume at the outgoing edge's target after the
    /// given number of seconds.  Zero means continue immediately.
    Suspend { delay_seconds: u64 },
}

/// Result of one node execution: a fragment merged into the run context
/// and a hint for choosing the next node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    pub output: Map<String, Value>,
    pub next: Next,
}

impl NodeOutcome {
    /// Continue along the unconditional edge with `output`.
    pub fn proceed(output: Value) -> Self {
        Self { output: into_map(output), next: Next::Continue }
    }

    /// Take the branch labelled `label`.
    pub fn branch(label: impl Into<String>, output: Value) -> Self {
        Self { output: into_map(output), next: Next::Branch(label.into()) }
    }

    /// Suspend the run; the output fragment is empty.
    pub fn suspend(delay_seconds: u64) -> Self {
        Self { output: Map::new(), next: Next::Suspend { delay_seconds } }
    }
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("output".into(), other);
            map
        }
    }
}

/// The core node trait.
///
/// Executors are constructed once with their collaborators and shared
/// across runs, so they must not keep per-run state.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Execute the node with its `config` against the run context and
    /// return the output fragment plus the next-node hint.
    async fn execute(
        &self,
        config: &Value,
        ctx: &ExecutionContext,
    ) -> Result<NodeOutcome, NodeError>;
}
