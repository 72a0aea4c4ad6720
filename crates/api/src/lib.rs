//! `api` crate: HTTP surface of the automation engine.
//!
//! Routes (tenant taken from the `x-organization-id` header):
//!   GET    /health
//!   POST   /api/v1/automations
//!   GET    /api/v1/automations
//!   GET    /api/v1/automations/:id
//!   DELETE /api/v1/automations/:id
//!   PATCH  /api/v1/automations/:id/status
//!   POST   /api/v1/automations/:id/trigger
//!   GET    /api/v1/automations/:id/runs
//!   POST   /api/v1/events
//!   POST   /api/v1/events/log
//!   GET    /api/v1/runs/:id
//!   POST   /api/v1/runs/:id/cancel
//!
//! Machine-to-machine (no tenant header):
//!   POST   /api/v1/queue/automation    signed queue deliveries
//!   POST   /api/v1/cron/{events,runs,waits}   bearer `CRON_SECRET`

pub mod config;
pub mod error;
pub mod handlers;
pub mod router;
pub mod state;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use router::{build_router, serve};
pub use state::AppState;
