//! `nodes` crate: the `ExecutableNode` trait and built-in node implementations.
//!
//! Every node type must implement [`ExecutableNode`] and be registered in a
//! [`NodeRegistry`].  The engine crate dispatches execution through the
//! registry; nodes reach the CRM and message channels only through the
//! traits in [`services`].

pub mod builtin;
pub mod credentials;
pub mod error;
pub mod mock;
pub mod registry;
pub mod services;
pub mod traits;
pub mod value;
pub mod variables;

pub use builtin::BuiltinDeps;
pub use credentials::{CredentialError, CredentialStore};
pub use error::NodeError;
pub use registry::NodeRegistry;
pub use services::{ChannelSender, CrmServices, RandomSource, ServiceError};
pub use traits::{ExecutableNode, ExecutionContext, Next, NodeOutcome};
pub use variables::{render, render_value};
