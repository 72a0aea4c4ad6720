//! Event log repository functions.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::EventLogRow};

const COLUMNS: &str = "id, organization_id, event_type, contact_id, payload, source, dedupe_key, \
                       processed, processed_at, error, created_at";

/// Insert an event unless an unprocessed entry with the same business key
/// already exists.
///
/// Returns `None` when the event was suppressed as a duplicate.  Events
/// without a `dedupe_key` are always inserted.
pub async fn insert_event_dedup(
    pool: &PgPool,
    organization_id: Uuid,
    event_type: &str,
    contact_id: Option<Uuid>,
    payload: &serde_json::Value,
    source: &str,
    dedupe_key: Option<&str>,
) -> Result<Option<EventLogRow>, DbError> {
    let mut tx = pool.begin().await?;

    if let Some(key) = dedupe_key {
        // Serialises concurrent producers on the same business key.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("{organization_id}:{event_type}:{key}"))
            .execute(&mut *tx)
            .await?;

        let existing: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM event_log
            WHERE organization_id = $1 AND event_type = $2 AND dedupe_key = $3 AND processed = false
            LIMIT 1
            "#,
        )
        .bind(organization_id)
        .bind(event_type)
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;

        if existing.is_some() {
            tx.rollback().await?;
            return Ok(None);
        }
    }

    let row = sqlx::query_as::<_, EventLogRow>(&format!(
        r#"
        INSERT INTO event_log
            (id, organization_id, event_type, contact_id, payload, source, dedupe_key, processed, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, false, $8)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(organization_id)
    .bind(event_type)
    .bind(contact_id)
    .bind(payload)
    .bind(source)
    .bind(dedupe_key)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(Some(row))
}

/// Claim up to `limit` of the oldest unprocessed events by marking them
/// processed in the same statement.  Concurrent sweepers skip each other's
/// locked rows, so every entry is returned to exactly one caller.
pub async fn claim_unprocessed(pool: &PgPool, limit: i64) -> Result<Vec<EventLogRow>, DbError> {
    let rows = sqlx::query_as::<_, EventLogRow>(&format!(
        r#"
        UPDATE event_log SET processed = true, processed_at = $2
        WHERE id IN (
            SELECT id FROM event_log
            WHERE processed = false
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING {COLUMNS}
        "#
    ))
    .bind(limit)
    .bind(Utc::now())
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Record the dispatch error of a claimed event.
pub async fn record_error(pool: &PgPool, id: Uuid, error: &str) -> Result<(), DbError> {
    sqlx::query("UPDATE event_log SET error = $2 WHERE id = $1")
        .bind(id)
        .bind(error)
        .execute(pool)
        .await?;

    Ok(())
}
