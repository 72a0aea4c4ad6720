//! Application router builder shared by the `serve` command and the tests.

use std::future::Future;
use std::net::SocketAddr;

use axum::http::HeaderValue;
use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::handlers::{automations, cron, events, health, queue, runs};
use crate::state::AppState;

/// Build the full application [`Router`] with tracing and CORS layers.
pub fn build_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);

    Router::new()
        .route("/health", get(health::health))
        .nest("/api/v1", api_routes())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Starting server");
    axum::serve(listener, build_router(state)).with_graceful_shutdown(shutdown).await
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/automations", post(automations::create).get(automations::list))
        .route("/automations/:id", get(automations::get).delete(automations::delete))
        .route("/automations/:id/status", patch(automations::update_status))
        .route("/automations/:id/trigger", post(automations::trigger))
        .route("/automations/:id/runs", get(automations::runs))
        .route("/events", post(events::emit))
        .route("/events/log", post(events::record))
        .route("/queue/automation", post(queue::deliver))
        .route("/runs/:id", get(runs::get))
        .route("/runs/:id/cancel", post(runs::cancel))
        .route("/cron/events", post(cron::events))
        .route("/cron/runs", post(cron::runs))
        .route("/cron/waits", post(cron::waits))
}

/// Any origin when `origins` is empty; invalid entries are skipped.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(origin = %o, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(parsed)
}
