//! Automation CRUD operations.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::{AutomationRow, NewAutomation}};

const COLUMNS: &str = "id, organization_id, name, status, trigger_type, trigger_config, \
                       nodes, edges, created_at, updated_at";

/// Insert a new automation into the database.
///
/// `nodes` / `edges` must already have passed graph validation in the
/// `engine` crate.
pub async fn create_automation(pool: &PgPool, new: NewAutomation) -> Result<AutomationRow, DbError> {
    let id = Uuid::new_v4();
    let now = Utc::now();

    let row = sqlx::query_as::<_, AutomationRow>(&format!(
        r#"
        INSERT INTO automations
            (id, organization_id, name, status, trigger_type, trigger_config, nodes, edges, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(new.organization_id)
    .bind(&new.name)
    .bind(&new.status)
    .bind(&new.trigger_type)
    .bind(&new.trigger_config)
    .bind(&new.nodes)
    .bind(&new.edges)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a single automation by its primary key, regardless of tenant.
///
/// Only used by the engine, which already holds a run scoped to the same
/// organization.
pub async fn get_automation(pool: &PgPool, id: Uuid) -> Result<AutomationRow, DbError> {
    sqlx::query_as::<_, AutomationRow>(&format!("SELECT {COLUMNS} FROM automations WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound("automation"))
}

/// Fetch a single automation owned by `organization_id`.
pub async fn get_automation_for_org(
    pool: &PgPool,
    organization_id: Uuid,
    id: Uuid,
) -> Result<AutomationRow, DbError> {
    sqlx::query_as::<_, AutomationRow>(&format!(
        "SELECT {COLUMNS} FROM automations WHERE id = $1 AND organization_id = $2"
    ))
    .bind(id)
    .bind(organization_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound("automation"))
}

/// Return all automations of an organization, newest first.
pub async fn list_automations(pool: &PgPool, organization_id: Uuid) -> Result<Vec<AutomationRow>, DbError> {
    let rows = sqlx::query_as::<_, AutomationRow>(&format!(
        "SELECT {COLUMNS} FROM automations WHERE organization_id = $1 ORDER BY created_at DESC"
    ))
    .bind(organization_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Active automations of an organization listening for `trigger_type`.
pub async fn list_active_by_trigger(
    pool: &PgPool,
    organization_id: Uuid,
    trigger_type: &str,
) -> Result<Vec<AutomationRow>, DbError> {
    let rows = sqlx::query_as::<_, AutomationRow>(&format!(
        r#"
        SELECT {COLUMNS} FROM automations
        WHERE organization_id = $1 AND trigger_type = $2 AND status = 'active'
        ORDER BY created_at ASC
        "#
    ))
    .bind(organization_id)
    .bind(trigger_type)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Change the lifecycle status (`draft` / `active` / `paused`).
pub async fn update_automation_status(
    pool: &PgPool,
    organization_id: Uuid,
    id: Uuid,
    status: &str,
) -> Result<AutomationRow, DbError> {
    sqlx::query_as::<_, AutomationRow>(&format!(
        r#"
        UPDATE automations SET status = $3, updated_at = $4
        WHERE id = $1 AND organization_id = $2
        RETURNING {COLUMNS}
        "#
    ))
    .bind(id)
    .bind(organization_id)
    .bind(status)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound("automation"))
}

/// Permanently delete an automation by its primary key.
///
/// Returns `DbError::NotFound` if no row was deleted.
pub async fn delete_automation(pool: &PgPool, organization_id: Uuid, id: Uuid) -> Result<(), DbError> {
    let result = sqlx::query("DELETE FROM automations WHERE id = $1 AND organization_id = $2")
        .bind(id)
        .bind(organization_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound("automation"));
    }

    Ok(())
}
