//! Submit job command
//!
//! Creates an ingestion job and starts its pipeline in the background. The
//! source reference is only checked for shape here; whether it resolves is
//! the extractor's call and shows up in the job's outcome.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::{IngestionOrchestrator, OrchestratorError};

/// Longest accepted source reference, in bytes.
pub const MAX_SOURCE_REF_LEN: usize = 2048;

/// Command to submit a media source for ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobCommand {
    pub source_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitJobError {
    #[error("source_ref is required and cannot be empty")]
    EmptySourceRef,

    #[error("source_ref is {0} bytes, the limit is {MAX_SOURCE_REF_LEN}")]
    SourceRefTooLong(usize),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

impl SubmitJobCommand {
    pub fn validate(&self) -> Result<(), SubmitJobError> {
        let source_ref = self.source_ref.trim();
        if source_ref.is_empty() {
            return Err(SubmitJobError::EmptySourceRef);
        }
        if source_ref.len() > MAX_SOURCE_REF_LEN {
            return Err(SubmitJobError::SourceRefTooLong(source_ref.len()));
        }
        Ok(())
    }
}

#[tracing::instrument(skip(orchestrator))]
pub async fn handle(
    orchestrator: &IngestionOrchestrator,
    command: SubmitJobCommand,
) -> Result<SubmitJobResponse, SubmitJobError> {
    command.validate()?;

    let job_id = orchestrator.submit(command.source_ref.trim()).await?;

    Ok(SubmitJobResponse { job_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_success() {
        let cmd = SubmitJobCommand {
            source_ref: "https://youtu.be/dQw4w9WgXcQ".to_string(),
        };
        assert!(cmd.validate().is_ok());
    }

    #[test]
    fn test_validation_empty_source_ref() {
        let cmd = SubmitJobCommand {
            source_ref: "   ".to_string(),
        };
        assert!(matches!(cmd.validate(), Err(SubmitJobError::EmptySourceRef)));
    }

    #[test]
    fn test_validation_source_ref_too_long() {
        let cmd = SubmitJobCommand {
            source_ref: "a".repeat(MAX_SOURCE_REF_LEN + 1),
        };
        assert!(matches!(
            cmd.validate(),
            Err(SubmitJobError::SourceRefTooLong(n)) if n == MAX_SOURCE_REF_LEN + 1
        ));
    }
}
