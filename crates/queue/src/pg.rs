//! Postgres-backed delay queue (`job_queue` table).
//!
//! `enqueue` inserts a row due at `now + delay`.  A worker claims due rows
//! with [`PgJobQueue::claim_next`], then reports back through
//! [`PgJobQueue::complete`] or [`PgJobQueue::fail`].  Failed jobs are retried
//! with exponential back-off until `max_attempts`, then dead-lettered.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use db::models::JobRow;
use db::repository::jobs;
use db::DbPool;

use crate::{JobQueue, QueueError};

pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;
const RETRY_BASE: Duration = Duration::from_secs(30);
const RETRY_CAP: Duration = Duration::from_secs(3_600);
/// Ten years.
const MAX_DELAY_SECS: u64 = 315_360_000;

#[derive(Clone)]
pub struct PgJobQueue {
    pool: DbPool,
}

impl PgJobQueue {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Claim the oldest due job, marking it `processing`.
    pub async fn claim_next(&self) -> Result<Option<JobRow>, QueueError> {
        Ok(jobs::fetch_next_job(&self.pool).await?)
    }

    pub async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        Ok(jobs::complete_job(&self.pool, job_id).await?)
    }

    /// Schedule a retry of `job`, or dead-letter it when this was its last
    /// attempt.
    pub async fn fail(&self, job: &JobRow, error: &str) -> Result<(), QueueError> {
        let attempt = job.attempts + 1;
        let backoff = retry_backoff(attempt);
        if attempt >= job.max_attempts {
            warn!(job_id = %job.id, attempt, error, "job dead-lettered");
        } else {
            debug!(job_id = %job.id, attempt, ?backoff, error, "job scheduled for retry");
        }
        let retry_at = Utc::now() + chrono::Duration::from_std(backoff).unwrap_or(chrono::Duration::zero());
        Ok(jobs::fail_job(&self.pool, job.id, error, retry_at).await?)
    }
}

/// Back-off before attempt `attempt + 1`: 30 s doubling per attempt, capped
/// at one hour.
pub fn retry_backoff(attempt: i32) -> Duration {
    let exponent = attempt.saturating_sub(1).clamp(0, 16) as u32;
    RETRY_BASE.saturating_mul(2u32.pow(exponent)).min(RETRY_CAP)
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job_type: &str, payload: &Value, delay_seconds: u64) -> Result<(), QueueError> {
        let run_at = Utc::now() + chrono::Duration::seconds(delay_seconds.min(MAX_DELAY_SECS) as i64);
        let job = jobs::enqueue_job(&self.pool, job_type, payload, run_at, DEFAULT_MAX_ATTEMPTS).await?;
        debug!(job_id = %job.id, job_type, %run_at, "job enqueued");
        Ok(())
    }
}
