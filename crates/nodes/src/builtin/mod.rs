//! Built-in node executors.
//!
//! Logic nodes (`trigger`, `condition`, `ab_split`, `delay`) are pure.  Action
//! nodes reach the outside world through the collaborators in
//! [`BuiltinDeps`]; their failures are folded into the output fragment
//! unless the node's config sets `failRunOnError: true`.

mod contacts;
mod deals;
mod logic;
mod messaging;
mod notify;
mod webhook;

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::warn;

pub use contacts::{AddTagNode, RemoveTagNode};
pub use deals::{CreateDealNode, MoveDealNode};
pub use logic::{AbSplitNode, ConditionNode, DelayNode, TriggerNode};
pub use messaging::SendMessageNode;
pub use notify::NotifyTeamNode;
pub use webhook::WebhookNode;

use crate::services::{ChannelSender, CrmServices, RandomSource, ServiceError, ThreadRandom, UnconfiguredChannel};
use crate::traits::NodeOutcome;
use crate::NodeError;

/// Default bound on a single external call.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(15);

/// Collaborators shared by the built-in action executors.
#[derive(Clone)]
pub struct BuiltinDeps {
    pub crm: Arc<dyn CrmServices>,
    pub whatsapp: Arc<dyn ChannelSender>,
    pub email: Arc<dyn ChannelSender>,
    pub sms: Arc<dyn ChannelSender>,
    pub random: Arc<dyn RandomSource>,
    pub http: reqwest::Client,
    pub action_timeout: Duration,
}

impl BuiltinDeps {
    /// Deps with the given CRM, no channel transports and a thread RNG.
    pub fn new(crm: Arc<dyn CrmServices>) -> Self {
        Self {
            crm,
            whatsapp: Arc::new(UnconfiguredChannel),
            email: Arc::new(UnconfiguredChannel),
            sms: Arc::new(UnconfiguredChannel),
            random: Arc::new(ThreadRandom),
            http: reqwest::Client::new(),
            action_timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }

    pub fn with_random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// First non-blank string under any of `keys` (camelCase first, aliases after).
pub(crate) fn str_field<'a>(config: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| config.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// First value under any of `keys` that is not null.
pub(crate) fn field<'a>(config: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|k| config.get(*k)).find(|v| !v.is_null())
}

pub(crate) fn fail_run_on_error(config: &Value) -> bool {
    field(config, &["failRunOnError", "fail_run_on_error"])
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Turn an external failure into either a recoverable output fragment
/// (`fallback` plus an `error` key) or, when the node asks for it, a fatal
/// node error.
pub(crate) fn external_failure(
    config: &Value,
    node_type: &str,
    error: impl Display,
    fallback: Value,
) -> Result<NodeOutcome, NodeError> {
    let message = error.to_string();
    if fail_run_on_error(config) {
        return Err(NodeError::Fatal(format!("{node_type}: {message}")));
    }
    warn!(node_type, error = %message, "external action failed, continuing");

    let mut output = match fallback {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };
    output.insert("error".into(), json!(message));
    Ok(NodeOutcome::proceed(Value::Object(output)))
}

/// Bound `call` by `timeout`; elapsing is a [`ServiceError::Timeout`].
pub(crate) async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or(Err(ServiceError::Timeout(timeout)))
}
