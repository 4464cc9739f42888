//! Cancel job command

use orpheon_common::job::JobStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::{CancelOutcome, IngestionOrchestrator, OrchestratorError};
use crate::jobs::JobStoreError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelJobCommand {
    pub job_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub job_id: Uuid,
    pub cancellation_requested: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CancelJobError {
    #[error("Job not found")]
    NotFound,

    #[error("Job is already {0}")]
    AlreadyTerminal(JobStatus),

    #[error("Job is not running in this process")]
    NotRunning,

    #[error(transparent)]
    Orchestrator(OrchestratorError),
}

impl From<OrchestratorError> for CancelJobError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Store(JobStoreError::NotFound(_)) => CancelJobError::NotFound,
            other => CancelJobError::Orchestrator(other),
        }
    }
}

/// Request cancellation. The pipeline honors it at its next step boundary,
/// so the job may still complete if it is already past its last boundary.
#[tracing::instrument(skip(orchestrator))]
pub async fn handle(
    orchestrator: &IngestionOrchestrator,
    command: CancelJobCommand,
) -> Result<CancelJobResponse, CancelJobError> {
    match orchestrator.cancel(command.job_id).await? {
        CancelOutcome::Requested => Ok(CancelJobResponse {
            job_id: command.job_id,
            cancellation_requested: true,
        }),
        CancelOutcome::AlreadyTerminal(status) => Err(CancelJobError::AlreadyTerminal(status)),
        CancelOutcome::NotRunning => Err(CancelJobError::NotRunning),
    }
}
