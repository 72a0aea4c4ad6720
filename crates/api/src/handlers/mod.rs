pub mod automations;
pub mod cron;
pub mod events;
pub mod health;
pub mod queue;
pub mod runs;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;

/// Header carrying the caller's tenant.
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

/// Tenant of the request, from the `x-organization-id` header.  Every
/// read and write below is scoped to it.
#[derive(Debug, Clone, Copy)]
pub struct OrgId(pub Uuid);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for OrgId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ORGANIZATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest(format!("missing {ORGANIZATION_HEADER} header")))?;
        Uuid::parse_str(raw.trim())
            .map(OrgId)
            .map_err(|_| ApiError::BadRequest(format!("{ORGANIZATION_HEADER} is not a UUID")))
    }
}

/// `?limit=` with a default and a ceiling.
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

impl LimitQuery {
    pub fn resolve(&self, default: i64, max: i64) -> i64 {
        self.limit.unwrap_or(default).clamp(1, max)
    }
}
