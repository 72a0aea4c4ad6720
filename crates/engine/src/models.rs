//! Core domain models for the automation engine.
//!
//! These types are the source of truth for what an automation looks like
//! in memory.  Nodes and edges round-trip through the JSONB `nodes` /
//! `edges` columns of the `automations` table using the editor's field
//! names (`type`, `data.config`, `sourceHandle`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Implements `as_str`, `Display` and `FromStr` over the snake_case names.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self { $($ty::$variant => $name),+ }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok($ty::$variant),)+
                    other => Err(ParseEnumError { kind: $kind, value: other.to_owned() }),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Trigger types and statuses
// ---------------------------------------------------------------------------

/// Business event an automation listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    ContactCreated,
    ContactUpdated,
    TagAdded,
    TagRemoved,
    DealCreated,
    DealStageChanged,
    MessageReceived,
    FormSubmitted,
    WebhookReceived,
    DateEvent,
    CartAbandoned,
    OrderCompleted,
    Manual,
}

string_enum!(TriggerType, "trigger type", {
    ContactCreated => "contact_created",
    ContactUpdated => "contact_updated",
    TagAdded => "tag_added",
    TagRemoved => "tag_removed",
    DealCreated => "deal_created",
    DealStageChanged => "deal_stage_changed",
    MessageReceived => "message_received",
    FormSubmitted => "form_submitted",
    WebhookReceived => "webhook_received",
    DateEvent => "date_event",
    CartAbandoned => "cart_abandoned",
    OrderCompleted => "order_completed",
    Manual => "manual",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutomationStatus {
    #[default]
    Draft,
    Active,
    Paused,
}

string_enum!(AutomationStatus, "automation status", {
    Draft => "draft",
    Active => "active",
    Paused => "paused",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

string_enum!(RunStatus, "run status", {
    Pending => "pending",
    Running => "running",
    Waiting => "waiting",
    Completed => "completed",
    Failed => "failed",
    Cancelled => "cancelled",
});

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
}

string_enum!(StepStatus, "step status", {
    Succeeded => "succeeded",
    Failed => "failed",
});

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Type-specific configuration handed to the executor.
    #[serde(default)]
    pub config: Value,
}

/// A single step in the automation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier within this automation (referenced by edges).
    pub id: String,
    /// Maps to a registered `ExecutableNode` implementation.
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: NodeData,
    /// Marks the entry node when it is not a `trigger` node.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub start: bool,
    /// Editor canvas position; ignored by the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, config: Value) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            data: NodeData { label: None, config },
            start: false,
            position: None,
        }
    }

    pub fn is_start(&self) -> bool {
        self.start || self.node_type == "trigger"
    }

    /// Branch labels this node type must have edges for.
    pub fn required_handles(&self) -> &'static [&'static str] {
        match self.node_type.as_str() {
            "condition" => &["true", "false"],
            "ab_split" | "split" => &["A", "B"],
            _ => &[],
        }
    }
}

/// Directed edge from one node to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    /// Branch label for edges leaving branching nodes.
    #[serde(default, rename = "sourceHandle", skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self { id: None, source: source.into(), target: target.into(), source_handle: None }
    }

    pub fn branch(source: impl Into<String>, handle: impl Into<String>, target: impl Into<String>) -> Self {
        Self { source_handle: Some(handle.into()), ..Self::new(source, target) }
    }

    /// Handle label, with blank handles treated as absent.
    pub fn handle(&self) -> Option<&str> {
        self.source_handle.as_deref().map(str::trim).filter(|h| !h.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Automation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Automation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub status: AutomationStatus,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_config: Value,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Automation {
    /// Convenience constructor for testing.
    pub fn new(
        organization_id: Uuid,
        name: impl Into<String>,
        trigger_type: TriggerType,
        nodes: Vec<Node>,
        edges: Vec<Edge>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            name: name.into(),
            status: AutomationStatus::Active,
            trigger_type,
            trigger_config: json!({}),
            nodes,
            edges,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn start_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.is_start())
    }

    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    /// Target of the edge leaving `node_id` through `handle`.
    ///
    /// With no handle, the first unconditional edge is taken; a node with a
    /// single outgoing edge follows it whatever its label.
    pub fn next_node_id(&self, node_id: &str, handle: Option<&str>) -> Option<&str> {
        let outgoing = move || self.edges.iter().filter(move |e| e.source == node_id);
        let edge = match handle {
            Some(label) => outgoing().find(|e| e.handle() == Some(label)),
            None => outgoing().find(|e| e.handle().is_none()).or_else(|| {
                let mut edges = outgoing();
                match (edges.next(), edges.next()) {
                    (Some(only), None) => Some(only),
                    _ => None,
                }
            }),
        };
        edge.map(|e| e.target.as_str())
    }
}

/// Input for creating an automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAutomation {
    pub name: String,
    #[serde(default)]
    pub status: AutomationStatus,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub trigger_config: Value,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRun {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub organization_id: Uuid,
    pub status: RunStatus,
    pub current_node_id: Option<String>,
    pub context: Value,
    pub last_error: Option<String>,
    /// When a `waiting` run is due to resume.
    pub resume_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AutomationRun {
    /// A fresh `pending` run positioned at `start_node_id`.
    pub fn pending(id: Uuid, automation: &Automation, start_node_id: &str, context: Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            automation_id: automation.id,
            organization_id: automation.organization_id,
            status: RunStatus::Pending,
            current_node_id: Some(start_node_id.to_owned()),
            context,
            last_error: None,
            resume_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Execution-history record of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStep {
    pub id: Uuid,
    pub run_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    pub output: Option<Value>,
    pub status: StepStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A typed business event handed to the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationEvent {
    pub organization_id: Uuid,
    pub event_type: TriggerType,
    #[serde(default)]
    pub contact_id: Option<Uuid>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "api".to_owned()
}

impl AutomationEvent {
    pub fn new(organization_id: Uuid, event_type: TriggerType, data: Value) -> Self {
        Self {
            organization_id,
            event_type,
            contact_id: None,
            email: None,
            phone: None,
            data,
            source: default_source(),
        }
    }

    pub fn with_contact(mut self, contact_id: Uuid) -> Self {
        self.contact_id = Some(contact_id);
        self
    }

    /// Event email, falling back to `data.email`.
    pub fn email(&self) -> Option<&str> {
        self.email
            .as_deref()
            .or_else(|| self.data.get("email").and_then(Value::as_str))
            .filter(|s| !s.trim().is_empty())
    }

    /// Event phone, falling back to `data.phone`.
    pub fn phone(&self) -> Option<&str> {
        self.phone
            .as_deref()
            .or_else(|| self.data.get("phone").and_then(Value::as_str))
            .filter(|s| !s.trim().is_empty())
    }

    /// Event Log payload: `{data, email, phone}`.
    pub fn log_payload(&self) -> Value {
        json!({ "data": self.data, "email": self.email, "phone": self.phone })
    }
}

/// A persisted Event Log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub event_type: String,
    pub contact_id: Option<Uuid>,
    pub payload: Value,
    pub source: String,
    pub dedupe_key: Option<String>,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl EventLogEntry {
    /// Rebuild the event.  Payloads without a `data` key are taken as the
    /// data itself.
    pub fn to_event(&self) -> Result<AutomationEvent, ParseEnumError> {
        let event_type = self.event_type.parse()?;
        let text = |key: &str| self.payload.get(key).and_then(Value::as_str).map(str::to_owned);
        let data = match self.payload.get("data") {
            Some(data) => data.clone(),
            None => self.payload.clone(),
        };
        Ok(AutomationEvent {
            organization_id: self.organization_id,
            event_type,
            contact_id: self.contact_id,
            email: text("email"),
            phone: text("phone"),
            data,
            source: self.source.clone(),
        })
    }
}
