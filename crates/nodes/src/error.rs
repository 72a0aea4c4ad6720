//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// Every variant fails the run: external-call failures that are
/// recoverable never surface here, executors fold them into their output
/// fragment instead.
/// - `InvalidConfig`: a required `config` field is missing or malformed.
/// - `MissingContext`: the run context lacks data the node cannot do without.
/// - `Fatal`: an external failure on a node configured with `failRunOnError`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum NodeError {
    #[error("invalid node config: {0}")]
    InvalidConfig(String),

    #[error("missing context value: {0}")]
    MissingContext(String),

    #[error("fatal node error: {0}")]
    Fatal(String),
}
