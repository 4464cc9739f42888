//! Ingestion orchestrator
//!
//! Drives each job through `pending → extracting → uploading → processing →
//! completed`, one sequential pipeline per job on its own task:
//!
//! 1. Extract: resolve the source into a media stream (extraction timeout)
//! 2. Upload: drain the stream into object storage under the job's key
//!    (upload timeout, size cap)
//! 3. Process: hand the key and metadata to the processing service
//!
//! Every failure ends in `failed` with an `error_detail`. Once an artifact may
//! exist in storage, failing first issues one compensating delete; a delete
//! that fails is recorded in `cleanup_error` and does not change the outcome.
//! Panics inside a pipeline are caught and resolved the same way, and a
//! pipeline whose future is dropped before it records an outcome is failed
//! with `interrupted` from a cleanup task.
//!
//! An upload abandoned mid-write may still land after its compensating
//! delete. Its key is deleted once more after `upload_settle_delay`.

use futures::FutureExt;
use orpheon_common::job::{Job, JobStatus, TransitionFields};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn, Instrument};
use uuid::Uuid;

use super::config::{PipelineConfig, MAX_CONCURRENT_JOBS_LIMIT};
use super::retention::{hook_for, RetentionHook};
use crate::extract::{ExtractError, ExtractedMedia, MediaExtractor};
use crate::jobs::{JobStore, JobStoreError};
use crate::processing::{ArtifactMetadata, ProcessingService};
use crate::storage::{artifact_key, ObjectStore, PutOptions, StorageError};

pub const DETAIL_CANCELLED: &str = "cancelled";
pub const DETAIL_INTERRUPTED: &str = "interrupted";
pub const DETAIL_INTERNAL_FAULT: &str = "InternalFault";
pub const DETAIL_TOO_LARGE: &str = "ArtifactTooLarge";
pub const DETAIL_UPLOAD_TIMEOUT: &str = "UploadTimeout";

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error("orchestrator is shutting down")]
    ShuttingDown,
}

/// Result of a cancellation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The running pipeline will stop at its next step boundary.
    Requested,
    AlreadyTerminal(JobStatus),
    /// The job is not terminal but no pipeline in this process owns it.
    NotRunning,
}

struct Inner {
    jobs: Arc<dyn JobStore>,
    storage: Arc<dyn ObjectStore>,
    extractor: Arc<dyn MediaExtractor>,
    processing: Arc<dyn ProcessingService>,
    retention: Arc<dyn RetentionHook>,
    config: PipelineConfig,
    permits: Arc<Semaphore>,
    permit_count: u32,
    active: Mutex<HashMap<Uuid, CancellationToken>>,
    shutdown: CancellationToken,
}

#[derive(Clone)]
pub struct IngestionOrchestrator {
    inner: Arc<Inner>,
}

impl IngestionOrchestrator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        storage: Arc<dyn ObjectStore>,
        extractor: Arc<dyn MediaExtractor>,
        processing: Arc<dyn ProcessingService>,
        config: PipelineConfig,
    ) -> Self {
        let retention = hook_for(config.retention);
        let permit_count = config.max_concurrent_jobs.clamp(1, MAX_CONCURRENT_JOBS_LIMIT);
        let permits = Arc::new(Semaphore::new(permit_count));
        let permit_count = u32::try_from(permit_count).unwrap_or(u32::MAX);

        Self {
            inner: Arc::new(Inner {
                jobs,
                storage,
                extractor,
                processing,
                retention,
                config,
                permits,
                permit_count,
                active: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Replace the retention hook derived from the configured policy.
    ///
    /// Must be called before the orchestrator is cloned.
    pub fn with_retention(mut self, retention: Arc<dyn RetentionHook>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.retention = retention,
            None => warn!("Retention hook not replaced: orchestrator already shared"),
        }
        self
    }

    /// Create a job and run its pipeline in the background.
    pub async fn submit(&self, source_ref: &str) -> Result<Uuid, OrchestratorError> {
        let (job_id, token) = self.register(source_ref).await?;

        let this = self.clone();
        let source_ref = source_ref.to_string();
        tokio::spawn(
            async move {
                if let Err(err) = this.drive(job_id, &source_ref, token).await {
                    error!(job_id = %job_id, error = %err, "Pipeline ended without a recorded outcome");
                }
            }
            .in_current_span(),
        );

        Ok(job_id)
    }

    /// Create a job and run its pipeline to a terminal state.
    ///
    /// Dropping the returned future fails the job with `interrupted`.
    pub async fn ingest(&self, source_ref: &str) -> Result<Job, OrchestratorError> {
        let (job_id, token) = self.register(source_ref).await?;
        self.drive(job_id, source_ref, token).await
    }

    pub async fn job(&self, job_id: Uuid) -> Result<Job, JobStoreError> {
        self.inner.jobs.get(job_id).await
    }

    /// Ids of jobs whose pipeline runs in this process
    pub async fn running(&self) -> Vec<Uuid> {
        self.inner.active.lock().await.keys().copied().collect()
    }

    /// Ask a running pipeline to stop at its next step boundary.
    pub async fn cancel(&self, job_id: Uuid) -> Result<CancelOutcome, OrchestratorError> {
        if let Some(token) = self.inner.active.lock().await.get(&job_id) {
            token.cancel();
            info!(job_id = %job_id, "Cancellation requested");
            return Ok(CancelOutcome::Requested);
        }

        let job = self.inner.jobs.get(job_id).await?;
        if job.status.is_terminal() {
            Ok(CancelOutcome::AlreadyTerminal(job.status))
        } else {
            Ok(CancelOutcome::NotRunning)
        }
    }

    /// Fail every job a previous process left unfinished, deleting any
    /// artifact it may have stored. Run once at startup, before `submit`.
    #[instrument(skip(self))]
    pub async fn recover_interrupted(&self) -> Result<usize, OrchestratorError> {
        let unfinished = self.inner.jobs.list_unfinished().await?;
        let count = unfinished.len();

        for job in unfinished {
            warn!(job_id = %job.id, status = %job.status, "Recovering interrupted job");
            let artifact = self.artifact_at_risk(&job);
            self.fail(job.id, DETAIL_INTERRUPTED, artifact.as_deref()).await?;
        }

        if count > 0 {
            info!(count, "Recovered interrupted jobs");
        }
        Ok(count)
    }

    /// Stop accepting jobs, cancel running pipelines and wait up to `grace`
    /// for them to record their outcome.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.shutdown.cancel();

        let total = self.inner.permit_count;
        match tokio::time::timeout(grace, self.inner.permits.acquire_many(total)).await {
            Ok(_) => info!("All pipelines stopped"),
            Err(_) => {
                let running = self.inner.active.lock().await.len();
                warn!(running, "Pipelines still running at shutdown deadline");
            },
        }
    }

    async fn register(&self, source_ref: &str) -> Result<(Uuid, CancellationToken), OrchestratorError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(OrchestratorError::ShuttingDown);
        }

        let job_id = self.inner.jobs.create(source_ref).await?;
        let token = self.inner.shutdown.child_token();
        self.inner.active.lock().await.insert(job_id, token.clone());

        info!(job_id = %job_id, source_ref, "Job created");
        Ok((job_id, token))
    }

    #[instrument(skip(self, token))]
    async fn drive(
        &self,
        job_id: Uuid,
        source_ref: &str,
        token: CancellationToken,
    ) -> Result<Job, OrchestratorError> {
        let guard = PipelineGuard::new(self.clone(), job_id);

        let outcome = match self.inner.permits.clone().acquire_owned().await {
            Ok(_permit) => {
                AssertUnwindSafe(self.pipeline(job_id, source_ref, &token))
                    .catch_unwind()
                    .await
            },
            Err(_) => Ok(Err(OrchestratorError::ShuttingDown)),
        };

        let result = match outcome {
            Ok(Ok(job)) => Ok(job),
            Ok(Err(err)) => {
                error!(error = %err, "Pipeline fault");
                self.resolve_fault(job_id, DETAIL_INTERNAL_FAULT)
                    .await
                    .and(Err(err))
            },
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(panic = %message, "Pipeline panicked");
                self.resolve_fault(job_id, DETAIL_INTERNAL_FAULT).await
            },
        };

        self.inner.active.lock().await.remove(&job_id);
        guard.disarm();

        if let Ok(job) = &result {
            self.inner
                .retention
                .on_terminal(job, self.inner.storage.as_ref())
                .await;
        }
        result
    }

    async fn pipeline(
        &self,
        job_id: Uuid,
        source_ref: &str,
        token: &CancellationToken,
    ) -> Result<Job, OrchestratorError> {
        let config = &self.inner.config;

        if token.is_cancelled() {
            return self.fail(job_id, DETAIL_CANCELLED, None).await;
        }
        self.advance(job_id, JobStatus::Extracting, TransitionFields::none())
            .await?;

        let media = match tokio::time::timeout(
            config.extraction_timeout,
            self.inner.extractor.resolve(source_ref),
        )
        .await
        {
            Ok(Ok(media)) => media,
            Ok(Err(err)) => {
                warn!(error = %err, "Extraction failed");
                return self.fail(job_id, err.kind(), None).await;
            },
            Err(_) => {
                warn!(timeout_secs = config.extraction_timeout.as_secs(), "Extraction timed out");
                return self
                    .fail(job_id, ExtractError::ExtractionTimeout.kind(), None)
                    .await;
            },
        };

        if token.is_cancelled() {
            return self.fail(job_id, DETAIL_CANCELLED, None).await;
        }
        self.advance(job_id, JobStatus::Uploading, TransitionFields::none())
            .await?;

        let key = artifact_key(&config.key_prefix, job_id);
        let ExtractedMedia {
            stream,
            size_bytes,
            mime_type,
            metadata,
        } = media;

        if size_bytes.is_some_and(|size| size > config.max_artifact_bytes) {
            warn!(size_bytes, limit = config.max_artifact_bytes, "Announced size over limit");
            return self.fail(job_id, DETAIL_TOO_LARGE, None).await;
        }

        let options = PutOptions::default()
            .content_type(mime_type.as_str())
            .max_bytes(config.max_artifact_bytes);

        // A failed or oversized put leaves nothing at the key.
        let upload = tokio::time::timeout(
            config.upload_timeout,
            self.inner.storage.put(&key, stream, options),
        )
        .await;

        let receipt = match upload {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(err)) => {
                warn!(error = %err, "Artifact upload failed");
                return self.fail(job_id, err.kind(), None).await;
            },
            Err(_) => {
                warn!(timeout_secs = config.upload_timeout.as_secs(), "Upload timed out");
                let job = self.fail(job_id, DETAIL_UPLOAD_TIMEOUT, Some(&key)).await?;
                self.sweep_later(job_id, key);
                return Ok(job);
            },
        };

        if token.is_cancelled() {
            return self.fail(job_id, DETAIL_CANCELLED, Some(&key)).await;
        }
        self.advance(
            job_id,
            JobStatus::Processing,
            TransitionFields::storage_key(&receipt.key),
        )
        .await?;

        let artifact = ArtifactMetadata {
            job_id,
            source_ref: source_ref.to_string(),
            mime_type,
            size_bytes: receipt.size,
            sha256: receipt.checksum,
            duration_secs: metadata.duration_secs,
            codec: metadata.codec,
            title: metadata.title,
        };

        match self.inner.processing.submit(&receipt.key, &artifact).await {
            Ok(result) => {
                let job = self
                    .advance(
                        job_id,
                        JobStatus::Completed,
                        TransitionFields::result_ref(result.result_ref),
                    )
                    .await?;
                info!(attempts = result.attempts, "Job completed");
                Ok(job)
            },
            Err(err) => {
                warn!(error = %err, "Processing failed");
                self.fail(job_id, &err.error_detail(), Some(&receipt.key))
                    .await
            },
        }
    }

    async fn advance(
        &self,
        job_id: Uuid,
        to: JobStatus,
        fields: TransitionFields,
    ) -> Result<Job, OrchestratorError> {
        let job = self.inner.jobs.transition(job_id, to, fields).await?;
        info!(job_id = %job_id, status = %to, "Job advanced");
        Ok(job)
    }

    /// Compensate and move the job to `failed`.
    ///
    /// `artifact` is deleted once before the transition; `NotFound` counts as
    /// already clean.
    async fn fail(
        &self,
        job_id: Uuid,
        detail: &str,
        artifact: Option<&str>,
    ) -> Result<Job, OrchestratorError> {
        let mut fields = TransitionFields::failure(detail);

        if let Some(key) = artifact {
            match self.inner.storage.delete(key).await {
                Ok(()) => info!(job_id = %job_id, key, "Compensating delete removed artifact"),
                Err(StorageError::NotFound(_)) => {},
                Err(err) => {
                    error!(job_id = %job_id, key, error = %err, "Compensating delete failed");
                    fields = fields.with_cleanup_error(format!("orphaned artifact {key}: {err}"));
                },
            }
        }

        let job = self.inner.jobs.transition(job_id, JobStatus::Failed, fields).await?;
        warn!(job_id = %job_id, detail, "Job failed");
        Ok(job)
    }

    /// Drive a job whose pipeline broke down to `failed` with `detail`.
    async fn resolve_fault(&self, job_id: Uuid, detail: &str) -> Result<Job, OrchestratorError> {
        let job = self.inner.jobs.get(job_id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }

        let artifact = self.artifact_at_risk(&job);
        let failed = self.fail(job_id, detail, artifact.as_deref()).await?;
        if let (JobStatus::Uploading, Some(key)) = (job.status, artifact) {
            self.sweep_later(job_id, key);
        }
        Ok(failed)
    }

    /// Delete `key` again once `upload_settle_delay` has passed, removing an
    /// abandoned write that landed after the compensating delete.
    fn sweep_later(&self, job_id: Uuid, key: String) {
        let storage = Arc::clone(&self.inner.storage);
        let delay = self.inner.config.upload_settle_delay;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match storage.delete(&key).await {
                Ok(()) => warn!(job_id = %job_id, key = %key, "Removed artifact that landed after its job failed"),
                Err(StorageError::NotFound(_)) => {},
                Err(err) => error!(job_id = %job_id, key = %key, error = %err, "Late artifact sweep failed"),
            }
        });
    }

    /// Key of an artifact that may exist for a non-terminal job.
    fn artifact_at_risk(&self, job: &Job) -> Option<String> {
        match job.status {
            JobStatus::Processing => job.storage_key.clone(),
            JobStatus::Uploading => Some(artifact_key(&self.inner.config.key_prefix, job.id)),
            _ => None,
        }
    }
}

/// Fails the job if `drive` is dropped before it records an outcome.
struct PipelineGuard {
    orchestrator: Option<IngestionOrchestrator>,
    job_id: Uuid,
}

impl PipelineGuard {
    fn new(orchestrator: IngestionOrchestrator, job_id: Uuid) -> Self {
        Self {
            orchestrator: Some(orchestrator),
            job_id,
        }
    }

    fn disarm(mut self) {
        self.orchestrator = None;
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        let Some(orchestrator) = self.orchestrator.take() else {
            return;
        };
        let job_id = self.job_id;

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(job_id = %job_id, "Pipeline dropped outside a runtime; left for recovery");
            return;
        };

        warn!(job_id = %job_id, "Pipeline dropped before recording an outcome");
        runtime.spawn(async move {
            orchestrator.inner.active.lock().await.remove(&job_id);
            if let Err(err) = orchestrator.resolve_fault(job_id, DETAIL_INTERRUPTED).await {
                error!(job_id = %job_id, error = %err, "Failed to resolve dropped pipeline");
            }
        });
    }
}
