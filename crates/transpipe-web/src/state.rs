//! Global application state shared across every route handler.
//!
//! A thin, cheaply-cloneable bundle of the pipeline's long-lived
//! collaborators: the `Store`, `EventBus`, `Orchestrator` and `BlobStore`.
//! There is no per-request session to look up — every operation is keyed
//! by client/material id straight into the store.

use std::sync::Arc;

use transpipe_core::{AppConfig, BlobStore, EventBus, Orchestrator, Providers, SharedStore};

/// Shared application state, injected into every axum handler via
/// `State<Arc<AppState>>`.
pub struct AppState {
    pub store: SharedStore,
    pub events: EventBus,
    pub orchestrator: Orchestrator,
    pub blobs: Arc<dyn BlobStore>,
    pub config: AppConfig,
}

impl AppState {
    #[must_use]
    pub fn new(store: SharedStore, blobs: Arc<dyn BlobStore>, config: AppConfig) -> Self {
        let events = EventBus::new();
        let providers = Providers::from_config(&config);
        let orchestrator = Orchestrator::new(store.clone(), events.clone(), providers, blobs.clone(), config.clone());
        Self { store, events, orchestrator, blobs, config }
    }
}
