use std::sync::Arc;

use engine::{AutomationStore, EventBus, EventProcessor, WorkflowExecutor};
use queue::SignatureVerifier;

use crate::config::ServerConfig;

/// Shared application state available to all handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AutomationStore>,
    pub bus: Arc<EventBus>,
    pub processor: Arc<EventProcessor>,
    /// `None` when no signing key is configured.
    pub verifier: Option<Arc<SignatureVerifier>>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(bus: Arc<EventBus>, processor: Arc<EventProcessor>, config: ServerConfig) -> Self {
        let verifier = config
            .queue_current_signing_key
            .clone()
            .map(|key| Arc::new(SignatureVerifier::new(key, config.queue_next_signing_key.clone())));
        if verifier.is_none() {
            tracing::warn!("QUEUE_CURRENT_SIGNING_KEY unset; queue deliveries will be rejected");
        }

        Self {
            store: bus.executor().store().clone(),
            bus,
            processor,
            verifier,
            config: Arc::new(config),
        }
    }

    pub fn executor(&self) -> &Arc<WorkflowExecutor> {
        self.bus.executor()
    }
}
