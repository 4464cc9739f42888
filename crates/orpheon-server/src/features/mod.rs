//! Feature modules implementing the Orpheon API
//!
//! Each feature is a vertical slice with its own commands, queries and routes:
//!
//! - `commands/` - Write operations (submit, cancel)
//! - `queries/` - Read operations (get)
//! - `routes.rs` - HTTP route definitions
//!
//! Handlers are plain async functions taking the state they need plus the
//! command or query value.

pub mod jobs;

use axum::Router;

use crate::ingest::IngestionOrchestrator;

/// Creates the API router with all feature routes mounted
pub fn router(orchestrator: IngestionOrchestrator) -> Router<()> {
    Router::new().merge(jobs::jobs_routes().with_state(orchestrator))
}
