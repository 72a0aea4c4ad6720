//! Encrypted credential storage.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbError, models::CredentialRow};

/// Insert or replace the credential stored under `key`.
pub async fn upsert_credential(
    pool: &PgPool,
    organization_id: Uuid,
    key: &str,
    encrypted_value: &str,
) -> Result<CredentialRow, DbError> {
    let row = sqlx::query_as::<_, CredentialRow>(
        r#"
        INSERT INTO credentials (id, organization_id, key, encrypted_value, created_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (organization_id, key) DO UPDATE SET encrypted_value = EXCLUDED.encrypted_value
        RETURNING id, organization_id, key, encrypted_value, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(organization_id)
    .bind(key)
    .bind(encrypted_value)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// All credentials of an organization.
pub async fn list_credentials(pool: &PgPool, organization_id: Uuid) -> Result<Vec<CredentialRow>, DbError> {
    let rows = sqlx::query_as::<_, CredentialRow>(
        r#"
        SELECT id, organization_id, key, encrypted_value, created_at
        FROM credentials WHERE organization_id = $1
        "#,
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
