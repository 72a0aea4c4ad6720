//! Automation run and run-step repository functions.
//!
//! Every status change is a compare-and-set: the `UPDATE` only matches when
//! the row is still in one of the expected statuses, and callers inspect the
//! returned flag to learn whether they won the transition.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{RunRow, RunStepRow},
};

const COLUMNS: &str = "id, automation_id, organization_id, status, current_node_id, context, \
                       last_error, resume_at, created_at, updated_at, completed_at";

// ---------------------------------------------------------------------------
// automation_runs
// ---------------------------------------------------------------------------

/// Create a new run in `pending` status positioned at `start_node_id`.
pub async fn create_run(
    pool: &PgPool,
    id: Uuid,
    automation_id: Uuid,
    organization_id: Uuid,
    start_node_id: &str,
    context: &serde_json::Value,
) -> Result<RunRow, DbError> {
    let now = Utc::now();

    let row = sqlx::query_as::<_, RunRow>(&format!(
        r#"
        INSERT INTO automation_runs
            (id, automation_id, organization_id, status, current_node_id, context, created_at, updated_at)
        VALUES ($1, $2, $3, 'pending', $4, $5, $6, $6)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(automation_id)
    .bind(organization_id)
    .bind(start_node_id)
    .bind(context)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a run by id.
pub async fn get_run(pool: &PgPool, id: Uuid) -> Result<RunRow, DbError> {
    sqlx::query_as::<_, RunRow>(&format!("SELECT {COLUMNS} FROM automation_runs WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound("run"))
}

/// Fetch a run owned by `organization_id`.
pub async fn get_run_for_org(pool: &PgPool, organization_id: Uuid, id: Uuid) -> Result<RunRow, DbError> {
    sqlx::query_as::<_, RunRow>(&format!(
        "SELECT {COLUMNS} FROM automation_runs WHERE id = $1 AND organization_id = $2"
    ))
    .bind(id)
    .bind(organization_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound("run"))
}

/// Most recent runs of one automation.
pub async fn list_runs_for_automation(
    pool: &PgPool,
    organization_id: Uuid,
    automation_id: Uuid,
    limit: i64,
) -> Result<Vec<RunRow>, DbError> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        r#"
        SELECT {COLUMNS} FROM automation_runs
        WHERE organization_id = $1 AND automation_id = $2
        ORDER BY created_at DESC
        LIMIT $3
        "#
    ))
    .bind(organization_id)
    .bind(automation_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// `pending` runs created before `created_before` (debounce window).
pub async fn list_pending_runs(
    pool: &PgPool,
    created_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<RunRow>, DbError> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        r#"
        SELECT {COLUMNS} FROM automation_runs
        WHERE status = 'pending' AND created_at < $1
        ORDER BY created_at ASC
        LIMIT $2
        "#
    ))
    .bind(created_before)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// `waiting` runs whose resume time is before `due_before`.
pub async fn list_due_waiting_runs(
    pool: &PgPool,
    due_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<RunRow>, DbError> {
    let rows = sqlx::query_as::<_, RunRow>(&format!(
        r#"
        SELECT {COLUMNS} FROM automation_runs
        WHERE status = 'waiting' AND resume_at IS NOT NULL AND resume_at < $1
        ORDER BY resume_at ASC
        LIMIT $2
        "#
    ))
    .bind(due_before)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Move a run into `running` if it is still in one of `from` and positioned
/// at `node_id` (or not positioned at all).
///
/// Returns `true` when this caller won the transition.
pub async fn claim_run(
    pool: &PgPool,
    id: Uuid,
    from: &[String],
    node_id: &str,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE automation_runs
        SET status = 'running', current_node_id = $3, resume_at = NULL, updated_at = $4
        WHERE id = $1
          AND status = ANY($2)
          AND (current_node_id IS NULL OR current_node_id = $3)
        "#,
    )
    .bind(id)
    .bind(from)
    .bind(node_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Persist progress of a `running` run after a step.
pub async fn save_progress(
    pool: &PgPool,
    id: Uuid,
    current_node_id: &str,
    context: &serde_json::Value,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE automation_runs
        SET current_node_id = $2, context = $3, updated_at = $4
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(id)
    .bind(current_node_id)
    .bind(context)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// `running → waiting` with the node to resume at and its due time.
pub async fn suspend_run(
    pool: &PgPool,
    id: Uuid,
    next_node_id: &str,
    context: &serde_json::Value,
    resume_at: DateTime<Utc>,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE automation_runs
        SET status = 'waiting', current_node_id = $2, context = $3, resume_at = $4, updated_at = $5
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(id)
    .bind(next_node_id)
    .bind(context)
    .bind(resume_at)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// `running → completed | failed`, stamping `completed_at`.
pub async fn finish_run(
    pool: &PgPool,
    id: Uuid,
    status: &str,
    context: &serde_json::Value,
    last_error: Option<&str>,
) -> Result<bool, DbError> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE automation_runs
        SET status = $2, context = $3, last_error = $4, completed_at = $5, updated_at = $5
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(context)
    .bind(last_error)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Mark a non-running run failed (e.g. its automation was deleted).
pub async fn fail_run(
    pool: &PgPool,
    id: Uuid,
    from: &[String],
    last_error: &str,
) -> Result<bool, DbError> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE automation_runs
        SET status = 'failed', last_error = $3, completed_at = $4, updated_at = $4
        WHERE id = $1 AND status = ANY($2)
        "#,
    )
    .bind(id)
    .bind(from)
    .bind(last_error)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Cancel a run that has not reached a terminal status.
pub async fn cancel_run(pool: &PgPool, organization_id: Uuid, id: Uuid) -> Result<bool, DbError> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        UPDATE automation_runs
        SET status = 'cancelled', resume_at = NULL, completed_at = $3, updated_at = $3
        WHERE id = $1 AND organization_id = $2 AND status IN ('pending', 'running', 'waiting')
        "#,
    )
    .bind(id)
    .bind(organization_id)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

// ---------------------------------------------------------------------------
// run_steps
// ---------------------------------------------------------------------------

/// Insert a finished step record.
#[allow(clippy::too_many_arguments)]
pub async fn insert_step(
    pool: &PgPool,
    run_id: Uuid,
    node_id: &str,
    node_type: &str,
    output: Option<&serde_json::Value>,
    status: &str,
    error: Option<&str>,
    started_at: DateTime<Utc>,
) -> Result<RunStepRow, DbError> {
    let row = sqlx::query_as::<_, RunStepRow>(
        r#"
        INSERT INTO run_steps
            (id, run_id, node_id, node_type, output, status, error, started_at, finished_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id, run_id, node_id, node_type, output, status, error, started_at, finished_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(run_id)
    .bind(node_id)
    .bind(node_type)
    .bind(output)
    .bind(status)
    .bind(error)
    .bind(started_at)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Steps of a run in execution order.
pub async fn list_steps(pool: &PgPool, run_id: Uuid) -> Result<Vec<RunStepRow>, DbError> {
    let rows = sqlx::query_as::<_, RunStepRow>(
        r#"
        SELECT id, run_id, node_id, node_type, output, status, error, started_at, finished_at
        FROM run_steps WHERE run_id = $1 ORDER BY started_at ASC
        "#,
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
