//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

/// Errors produced by the automation engine (validation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the automation.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        node_id: String,
        side: &'static str,
    },

    #[error("automation has no start node (a `trigger` node or one marked `start: true`)")]
    MissingStartNode,

    #[error("automation has more than one start node: {0:?}")]
    MultipleStartNodes(Vec<String>),

    #[error("node '{0}' is not reachable from the start node")]
    UnreachableNode(String),

    /// A branching node lacks the edge for one of its outcomes.
    #[error("node '{node_id}' is missing its '{handle}' edge")]
    MissingBranch { node_id: String, handle: String },

    /// More than one edge leaves the same node through the same handle.
    #[error("node '{node_id}' has more than one '{handle}' edge")]
    DuplicateBranch { node_id: String, handle: String },

    #[error("node '{node_id}' has unknown type '{node_type}'")]
    UnknownNodeType { node_id: String, node_type: String },

    // ------ Execution errors ------

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("automation {0} not found")]
    AutomationNotFound(Uuid),

    #[error("unsupported job type '{0}'")]
    UnsupportedJob(String),

    #[error("invalid job payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),

    /// Persistence error from the store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] queue::QueueError),
}

impl EngineError {
    /// `true` for errors raised by graph validation.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateNodeId(_)
                | Self::UnknownNodeReference { .. }
                | Self::MissingStartNode
                | Self::MultipleStartNodes(_)
                | Self::UnreachableNode(_)
                | Self::MissingBranch { .. }
                | Self::DuplicateBranch { .. }
                | Self::UnknownNodeType { .. }
        )
    }
}
