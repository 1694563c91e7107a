//! HTTP API
//!
//! A thin JSON surface over the orchestrator: one-shot turns, streamed
//! turns as Server-Sent Events, and the responder listing.

mod handlers;
mod sse;
mod types;

pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::orchestrator::Orchestrator;
use crate::session::SessionStore;
use std::sync::Arc;

/// Orchestrator behind the HTTP surface, with the store erased
pub type SharedOrchestrator = Arc<Orchestrator<Arc<dyn SessionStore>>>;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: SharedOrchestrator,
}

impl AppState {
    pub fn new(orchestrator: SharedOrchestrator) -> Self {
        Self { orchestrator }
    }
}
