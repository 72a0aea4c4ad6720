//! `queue` crate: delayed re-entry into the engine.
//!
//! A [`JobQueue`] accepts a typed payload and delivers it back after a
//! wall-clock delay, at least once.  Three implementations ship here:
//!
//! - [`HttpDelayQueue`]: external delay-queue provider that POSTs the
//!   message to our callback endpoint, signed with HMAC-SHA256.
//! - [`PgJobQueue`]: the `job_queue` table, drained by a worker.
//! - [`MemoryQueue`]: in-process capture for tests.
//!
//! Consumers must be idempotent; the engine guards resumes with
//! compare-and-set on run status.

pub mod delay;
pub mod error;
pub mod http;
pub mod memory;
pub mod message;
pub mod pg;
pub mod signature;

use async_trait::async_trait;
use serde_json::Value;

pub use delay::{calculate_delay_seconds, DelayUnit};
pub use error::QueueError;
pub use http::{HttpDelayQueue, HttpQueueConfig};
pub use memory::{MemoryQueue, QueuedJob};
pub use message::{QueueEnvelope, StepMessage, AUTOMATION_STEP};
pub use pg::PgJobQueue;
pub use signature::{sign, SignatureVerifier, Verification, SIGNATURE_HEADER};

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Schedule `payload` for delivery as a `job_type` message after
    /// `delay_seconds`.
    async fn enqueue(&self, job_type: &str, payload: &Value, delay_seconds: u64) -> Result<(), QueueError>;
}
