use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("unknown delay unit '{0}' (expected minutes, hours or days)")]
    InvalidDelayUnit(String),

    #[error("queue request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("queue provider rejected message: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid queue payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    #[error("cannot sign payload: {0}")]
    Signing(String),

    #[error("queue unavailable: {0}")]
    Unavailable(String),
}
