//! Narrow access to the CRM tables touched by automation actions
//! (contact tags, team notifications, deals).

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    DbError,
    models::{DealRow, NotificationRow},
};

/// Tags of a contact, or `NotFound` when the contact is not in the
/// organization.
pub async fn get_contact_tags(
    pool: &PgPool,
    organization_id: Uuid,
    contact_id: Uuid,
) -> Result<Vec<String>, DbError> {
    let row: Option<(Vec<String>,)> =
        sqlx::query_as("SELECT tags FROM contacts WHERE id = $1 AND organization_id = $2")
            .bind(contact_id)
            .bind(organization_id)
            .fetch_optional(pool)
            .await?;

    row.map(|(tags,)| tags).ok_or(DbError::NotFound("contact"))
}

/// Append `tag` unless already present.  Returns `true` if it was added.
pub async fn add_contact_tag(
    pool: &PgPool,
    organization_id: Uuid,
    contact_id: Uuid,
    tag: &str,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE contacts SET tags = array_append(tags, $3), updated_at = $4
        WHERE id = $1 AND organization_id = $2 AND NOT ($3 = ANY(tags))
        "#,
    )
    .bind(contact_id)
    .bind(organization_id)
    .bind(tag)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Remove `tag` if present.  Returns `true` if it was removed.
pub async fn remove_contact_tag(
    pool: &PgPool,
    organization_id: Uuid,
    contact_id: Uuid,
    tag: &str,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        r#"
        UPDATE contacts SET tags = array_remove(tags, $3), updated_at = $4
        WHERE id = $1 AND organization_id = $2 AND $3 = ANY(tags)
        "#,
    )
    .bind(contact_id)
    .bind(organization_id)
    .bind(tag)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Store an internal team notification.
pub async fn insert_notification(
    pool: &PgPool,
    organization_id: Uuid,
    title: &str,
    message: &str,
) -> Result<NotificationRow, DbError> {
    let row = sqlx::query_as::<_, NotificationRow>(
        r#"
        INSERT INTO notifications (id, organization_id, title, message, created_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, organization_id, title, message, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(organization_id)
    .bind(title)
    .bind(message)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Create a deal.
pub async fn insert_deal(
    pool: &PgPool,
    organization_id: Uuid,
    contact_id: Option<Uuid>,
    pipeline_id: Option<Uuid>,
    stage_id: Option<Uuid>,
    title: &str,
    value: Option<f64>,
) -> Result<DealRow, DbError> {
    let row = sqlx::query_as::<_, DealRow>(
        r#"
        INSERT INTO deals (id, organization_id, contact_id, pipeline_id, stage_id, title, value, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, organization_id, contact_id, pipeline_id, stage_id, title, value, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(organization_id)
    .bind(contact_id)
    .bind(pipeline_id)
    .bind(stage_id)
    .bind(title)
    .bind(value)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Move a deal to another stage.
pub async fn move_deal(
    pool: &PgPool,
    organization_id: Uuid,
    deal_id: Uuid,
    stage_id: Uuid,
) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE deals SET stage_id = $3 WHERE id = $1 AND organization_id = $2")
        .bind(deal_id)
        .bind(organization_id)
        .bind(stage_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound("deal"));
    }
    Ok(())
}
