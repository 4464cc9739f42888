//! Get job query
//!
//! Query to get a single job by ID.

use orpheon_common::job::Job;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::IngestionOrchestrator;
use crate::jobs::JobStoreError;

/// Query to get a job by ID
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetJobQuery {
    pub job_id: Uuid,
}

/// Error type for get job query
#[derive(Debug, thiserror::Error)]
pub enum GetJobError {
    #[error("Job not found")]
    NotFound,
    #[error(transparent)]
    Store(JobStoreError),
}

pub async fn handle(
    orchestrator: &IngestionOrchestrator,
    query: GetJobQuery,
) -> Result<Job, GetJobError> {
    orchestrator.job(query.job_id).await.map_err(|err| match err {
        JobStoreError::NotFound(_) => GetJobError::NotFound,
        other => GetJobError::Store(other),
    })
}
