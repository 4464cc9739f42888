//! Ingestion pipeline

pub mod config;
pub mod orchestrator;
pub mod retention;

pub use config::{PipelineConfig, RetentionPolicy};
pub use orchestrator::{CancelOutcome, IngestionOrchestrator, OrchestratorError};
pub use retention::{DeleteOnCompletion, KeepArtifacts, RetentionHook};
