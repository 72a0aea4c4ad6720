//! Job queue repository functions.
//!
//! The built-in delay queue is backed by the `job_queue` Postgres table.
//! Workers poll the table and use `SELECT … FOR UPDATE SKIP LOCKED`
//! for safe concurrent processing.  A job only becomes visible once its
//! `run_at` has passed.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::JobRow};

const COLUMNS: &str = "id, job_type, status, attempts, max_attempts, payload, run_at, last_error, \
                       created_at, updated_at";

/// Enqueue a new job that becomes due at `run_at`.
///
/// `payload` is arbitrary JSON that the worker will pass back to the engine.
pub async fn enqueue_job(
    pool: &PgPool,
    job_type: &str,
    payload: &serde_json::Value,
    run_at: DateTime<Utc>,
    max_attempts: i32,
) -> Result<JobRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        INSERT INTO job_queue
            (id, job_type, status, attempts, max_attempts, payload, run_at, created_at, updated_at)
        VALUES ($1, $2, 'pending', 0, $3, $4, $5, $6, $6)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(job_type)
    .bind(max_attempts)
    .bind(payload)
    .bind(run_at)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Atomically fetch the oldest due job and mark it as `processing`.
///
/// Uses `SELECT … FOR UPDATE SKIP LOCKED` so multiple workers can poll
/// safely without stepping on each other.
///
/// Returns `None` if no due jobs exist.
pub async fn fetch_next_job(pool: &PgPool) -> Result<Option<JobRow>, DbError> {
    let mut tx = pool.begin().await?;
    let now = Utc::now();

    let row = sqlx::query_as::<_, JobRow>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM job_queue
        WHERE status = 'pending' AND run_at <= $1
        ORDER BY run_at ASC
        LIMIT 1
        FOR UPDATE SKIP LOCKED
        "#
    ))
    .bind(now)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(ref job) = row {
        sqlx::query(
            r#"
            UPDATE job_queue
            SET status = 'processing', attempts = attempts + 1, updated_at = $1
            WHERE id = $2
            "#,
        )
        .bind(now)
        .bind(job.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
    } else {
        tx.rollback().await?;
    }

    Ok(row)
}

/// Mark a job as completed.
pub async fn complete_job(pool: &PgPool, job_id: Uuid) -> Result<(), DbError> {
    sqlx::query("UPDATE job_queue SET status = 'completed', updated_at = $1 WHERE id = $2")
        .bind(Utc::now())
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Return a failed job to `pending` at `retry_at`, or dead-letter it once
/// `max_attempts` is reached.
pub async fn fail_job(
    pool: &PgPool,
    job_id: Uuid,
    error: &str,
    retry_at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query(
        r#"
        UPDATE job_queue
        SET status = CASE WHEN attempts >= max_attempts THEN 'dead_lettered' ELSE 'pending' END,
            run_at = $2,
            last_error = $3,
            updated_at = $4
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(retry_at)
    .bind(error)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}
