//! Test doubles: `MockNode`, `MockCrm`, `MockChannel` and deterministic
//! random sources.
//!
//! Useful in unit and integration tests where the real collaborators
//! (Postgres, message providers, an RNG) are unavailable or irrelevant.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::services::{
    ChannelSender, CrmServices, DeliveryReceipt, NewDeal, OutboundMessage, RandomSource, ServiceError,
};
use crate::traits::{ExecutionContext, Next, NodeOutcome};
use crate::{ExecutableNode, NodeError};

// ---------------------------------------------------------------------------
// MockNode
// ---------------------------------------------------------------------------

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Return the output fragment and follow `next`.
    Return(Value, Next),
    /// Fail with an `InvalidConfig` error.
    FailConfig(String),
}

/// A mock node that records the run context of every call it receives and
/// returns a programmer-specified outcome.
pub struct MockNode {
    /// Label used in test assertions; added to the output as `node`.
    pub name: String,
    pub behaviour: MockBehaviour,
    /// Run context seen on each call, in call order.
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl MockNode {
    fn with(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self { name: name.into(), behaviour, calls: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Always succeeds with `output` and continues.
    pub fn returning(name: impl Into<String>, output: Value) -> Self {
        Self::with(name, MockBehaviour::Return(output, Next::Continue))
    }

    /// Always takes the branch labelled `label`.
    pub fn branching(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self::with(name, MockBehaviour::Return(json!({}), Next::Branch(label.into())))
    }

    /// Always suspends for `delay_seconds`.
    pub fn suspending(name: impl Into<String>, delay_seconds: u64) -> Self {
        Self::with(name, MockBehaviour::Return(Value::Null, Next::Suspend { delay_seconds }))
    }

    pub fn failing_config(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with(name, MockBehaviour::FailConfig(msg.into()))
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    async fn execute(&self, _config: &Value, ctx: &ExecutionContext) -> Result<NodeOutcome, NodeError> {
        self.calls.lock().unwrap().push(ctx.data.clone());

        match &self.behaviour {
            MockBehaviour::Return(Value::Null, next) => {
                Ok(NodeOutcome { output: serde_json::Map::new(), next: next.clone() })
            }
            MockBehaviour::Return(value, next) => {
                let mut output = serde_json::Map::new();
                output.insert("node".into(), json!(self.name));
                if let Some(fields) = value.as_object() {
                    output.extend(fields.clone());
                }
                Ok(NodeOutcome { output, next: next.clone() })
            }
            MockBehaviour::FailConfig(msg) => Err(NodeError::InvalidConfig(msg.clone())),
        }
    }
}

// ---------------------------------------------------------------------------
// MockCrm
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CrmState {
    tags: HashMap<(Uuid, Uuid), Vec<String>>,
    notifications: Vec<(Uuid, String, String)>,
    deals: Vec<(Uuid, NewDeal)>,
    moves: Vec<(Uuid, Uuid)>,
}

/// In-memory CRM.  `set_unavailable(true)` makes every call fail.
#[derive(Default)]
pub struct MockCrm {
    state: Mutex<CrmState>,
    unavailable: AtomicBool,
}

impl MockCrm {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn seed_tag(&self, organization_id: Uuid, contact_id: Uuid, tag: &str) {
        self.state
            .lock()
            .unwrap()
            .tags
            .entry((organization_id, contact_id))
            .or_default()
            .push(tag.to_owned());
    }

    pub fn tags(&self, organization_id: Uuid, contact_id: Uuid) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .tags
            .get(&(organization_id, contact_id))
            .cloned()
            .unwrap_or_default()
    }

    /// `(organization_id, title, message)` of every stored notification.
    pub fn notifications(&self) -> Vec<(Uuid, String, String)> {
        self.state.lock().unwrap().notifications.clone()
    }

    pub fn deals(&self) -> Vec<(Uuid, NewDeal)> {
        self.state.lock().unwrap().deals.clone()
    }

    /// `(deal_id, stage_id)` of every move.
    pub fn moves(&self) -> Vec<(Uuid, Uuid)> {
        self.state.lock().unwrap().moves.clone()
    }

    fn check(&self) -> Result<(), ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ServiceError::Unavailable("mock crm offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CrmServices for MockCrm {
    async fn add_tag(&self, organization_id: Uuid, contact_id: Uuid, tag: &str) -> Result<bool, ServiceError> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let tags = state.tags.entry((organization_id, contact_id)).or_default();
        if tags.iter().any(|t| t == tag) {
            return Ok(false);
        }
        tags.push(tag.to_owned());
        Ok(true)
    }

    async fn remove_tag(&self, organization_id: Uuid, contact_id: Uuid, tag: &str) -> Result<bool, ServiceError> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let tags = state.tags.entry((organization_id, contact_id)).or_default();
        let before = tags.len();
        tags.retain(|t| t != tag);
        Ok(tags.len() != before)
    }

    async fn create_notification(&self, organization_id: Uuid, title: &str, message: &str) -> Result<Uuid, ServiceError> {
        self.check()?;
        self.state
            .lock()
            .unwrap()
            .notifications
            .push((organization_id, title.to_owned(), message.to_owned()));
        Ok(Uuid::new_v4())
    }

    async fn create_deal(&self, _organization_id: Uuid, deal: NewDeal) -> Result<Uuid, ServiceError> {
        self.check()?;
        let id = Uuid::new_v4();
        self.state.lock().unwrap().deals.push((id, deal));
        Ok(id)
    }

    async fn move_deal(&self, _organization_id: Uuid, deal_id: Uuid, stage_id: Uuid) -> Result<(), ServiceError> {
        self.check()?;
        self.state.lock().unwrap().moves.push((deal_id, stage_id));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockChannel
// ---------------------------------------------------------------------------

/// Records every message; optionally sleeps before answering or fails.
#[derive(Default)]
pub struct MockChannel {
    sent: Mutex<Vec<OutboundMessage>>,
    latency: Option<Duration>,
    failing: AtomicBool,
}

impl MockChannel {
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency: Some(latency), ..Self::default() }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelSender for MockChannel {
    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, ServiceError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable(format!("mock {} provider down", message.channel)));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(DeliveryReceipt { message_id: Some(format!("msg_{}", Uuid::new_v4().simple())) })
    }
}

// ---------------------------------------------------------------------------
// Random sources
// ---------------------------------------------------------------------------

/// Always draws the same value.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn percent(&self) -> f64 {
        self.0
    }
}

/// Seeded, reproducible uniform draws.
pub struct SeededRandom(Mutex<StdRng>);

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self(Mutex::new(StdRng::seed_from_u64(seed)))
    }
}

impl RandomSource for SeededRandom {
    fn percent(&self) -> f64 {
        self.0.lock().unwrap().gen_range(0.0..100.0)
    }
}
