//! `engine` crate: domain models, graph validation, trigger matching and
//! the execution engine.
//!
//! Entry points:
//! - [`EventBus`] turns business events into automation runs.
//! - [`WorkflowExecutor`] walks a run through its graph.
//! - [`EventProcessor`] sweeps stalled events and runs.
//! - [`worker::dispatch_job`] / [`JobWorker`] feed queue deliveries back in.

pub mod bus;
pub mod config;
pub mod error;
pub mod executor;
pub mod graph;
pub mod models;
pub mod processor;
pub mod store;
pub mod triggers;
pub mod worker;

pub use bus::{DispatchMode, EmitReport, EventBus};
pub use config::{ConfigError, EngineConfig};
pub use error::EngineError;
pub use executor::{ExecutorConfig, SkipReason, StepOutcome, WorkflowExecutor};
pub use graph::validate_graph;
pub use models::{Automation, AutomationEvent, AutomationRun, Edge, Node, TriggerType};
pub use processor::{EventProcessor, ProcessorConfig, SweepReport};
pub use store::{AutomationStore, MemoryStore, PgCrm, PgStore, StoreError};
pub use worker::{dispatch_job, JobWorker};

#[cfg(test)]
mod executor_tests;
