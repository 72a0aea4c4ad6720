use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::{JobQueue, QueueError};

/// A message captured by [`MemoryQueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub job_type: String,
    pub payload: Value,
    pub delay_seconds: u64,
}

/// Records enqueued messages instead of delivering them.  Tests deliver
/// them by hand, which also makes duplicate deliveries easy to simulate.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    jobs: Mutex<Vec<QueuedJob>>,
    failing: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent enqueue fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn jobs(&self) -> Vec<QueuedJob> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Remove and return everything captured so far.
    pub fn take(&self) -> Vec<QueuedJob> {
        std::mem::take(&mut *self.jobs.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job_type: &str, payload: &Value, delay_seconds: u64) -> Result<(), QueueError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable("memory queue set to fail".into()));
        }
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(QueuedJob { job_type: job_type.to_owned(), payload: payload.clone(), delay_seconds });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn captures_and_drains() {
        let queue = MemoryQueue::new();
        queue.enqueue("automation_step", &json!({ "n": 1 }), 60).await.unwrap();
        assert_eq!(queue.jobs().len(), 1);
        assert_eq!(queue.take()[0].delay_seconds, 60);
        assert!(queue.jobs().is_empty());

        queue.set_failing(true);
        assert!(queue.enqueue("automation_step", &json!({}), 0).await.is_err());
    }
}
