//! Shared application state for the server.

use std::sync::Arc;

use narrative_core::SessionRegistry;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}
