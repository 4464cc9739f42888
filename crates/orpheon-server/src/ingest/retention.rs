use async_trait::async_trait;
use orpheon_common::job::{Job, JobStatus};
use std::sync::Arc;
use tracing::{info, warn};

use super::config::RetentionPolicy;
use crate::storage::{ObjectStore, StorageError};

/// Runs once a job has reached `completed` or `failed`
#[async_trait]
pub trait RetentionHook: Send + Sync {
    async fn on_terminal(&self, job: &Job, storage: &dyn ObjectStore);
}

/// Leaves artifacts in place
pub struct KeepArtifacts;

#[async_trait]
impl RetentionHook for KeepArtifacts {
    async fn on_terminal(&self, _job: &Job, _storage: &dyn ObjectStore) {}
}

/// Deletes the artifact of a completed job once the processing service has
/// taken it over
pub struct DeleteOnCompletion;

#[async_trait]
impl RetentionHook for DeleteOnCompletion {
    async fn on_terminal(&self, job: &Job, storage: &dyn ObjectStore) {
        if job.status != JobStatus::Completed {
            return;
        }
        let Some(key) = job.storage_key.as_deref() else {
            return;
        };

        match storage.delete(key).await {
            Ok(()) => info!(job_id = %job.id, key, "Retention removed artifact"),
            Err(StorageError::NotFound(_)) => {},
            Err(err) => warn!(job_id = %job.id, key, error = %err, "Retention delete failed"),
        }
    }
}

pub fn hook_for(policy: RetentionPolicy) -> Arc<dyn RetentionHook> {
    match policy {
        RetentionPolicy::Keep => Arc::new(KeepArtifacts),
        RetentionPolicy::DeleteOnCompletion => Arc::new(DeleteOnCompletion),
    }
}
