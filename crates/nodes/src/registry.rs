//! Node registry: maps a node-type tag to its executor.

use std::collections::HashMap;
use std::sync::Arc;

use crate::builtin::{
    AbSplitNode, AddTagNode, BuiltinDeps, ConditionNode, CreateDealNode, DelayNode, MoveDealNode,
    NotifyTeamNode, RemoveTagNode, SendMessageNode, TriggerNode, WebhookNode,
};
use crate::services::Channel;
use crate::ExecutableNode;

#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: HashMap<String, Arc<dyn ExecutableNode>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in node type wired to `deps`.
    pub fn builtin(deps: &BuiltinDeps) -> Self {
        let timeout = deps.action_timeout;
        let split: Arc<dyn ExecutableNode> = Arc::new(AbSplitNode::new(deps.random.clone()));

        let mut registry = Self::new();
        registry
            .register("trigger", Arc::new(TriggerNode))
            .register("condition", Arc::new(ConditionNode))
            .register("ab_split", split.clone())
            .register("split", split)
            .register("delay", Arc::new(DelayNode))
            .register("add_tag", Arc::new(AddTagNode::new(deps.crm.clone(), timeout)))
            .register("remove_tag", Arc::new(RemoveTagNode::new(deps.crm.clone(), timeout)))
            .register("notify_team", Arc::new(NotifyTeamNode::new(deps.crm.clone(), timeout)))
            .register("webhook", Arc::new(WebhookNode::new(deps.http.clone(), timeout)))
            .register(
                "send_whatsapp",
                Arc::new(SendMessageNode::new(Channel::Whatsapp, deps.whatsapp.clone(), timeout)),
            )
            .register(
                "send_email",
                Arc::new(SendMessageNode::new(Channel::Email, deps.email.clone(), timeout)),
            )
            .register("send_sms", Arc::new(SendMessageNode::new(Channel::Sms, deps.sms.clone(), timeout)))
            .register("create_deal", Arc::new(CreateDealNode::new(deps.crm.clone(), timeout)))
            .register("move_deal", Arc::new(MoveDealNode::new(deps.crm.clone(), timeout)));
        registry
    }

    /// Register (or replace) the executor for `node_type`.
    pub fn register(&mut self, node_type: impl Into<String>, node: Arc<dyn ExecutableNode>) -> &mut Self {
        self.nodes.insert(node_type.into(), node);
        self
    }

    pub fn get(&self, node_type: &str) -> Option<Arc<dyn ExecutableNode>> {
        self.nodes.get(node_type).cloned()
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.nodes.contains_key(node_type)
    }

    /// Registered tags, sorted.
    pub fn known_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.nodes.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry").field("types", &self.known_types()).finish()
    }
}
