pub mod error;
pub mod handlers;
pub mod request_id;
pub mod server;

use pkg_controllers::{AdmissionGate, QuotaTuner};
use pkg_state::client::StateStore;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: StateStore,
    pub tuner: QuotaTuner,
    pub gate: AdmissionGate,
}

impl AppState {
    pub fn new(store: StateStore, tuner: QuotaTuner, gate: AdmissionGate) -> Self {
        Self { store, tuner, gate }
    }
}
