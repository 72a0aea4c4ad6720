//! Errors returned by the repository functions.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// No row matched; carries the entity name.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
