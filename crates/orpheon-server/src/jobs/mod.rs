//! Job state store
//!
//! Durable job records keyed by id. Every `transition` validates the requested
//! change with [`Job::apply_transition`] while holding an exclusive lock on that
//! one job, so concurrent writers to a job serialize and writers to different
//! jobs never wait on each other.

use async_trait::async_trait;
use orpheon_common::job::{Job, JobStatus, TransitionError, TransitionFields};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    #[error("corrupt job record {id}: {reason}")]
    Corrupt { id: Uuid, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new `pending` job and return its id.
    async fn create(&self, source_ref: &str) -> Result<Uuid, JobStoreError>;

    /// Move a job to `to`, writing `fields` alongside. On error the stored
    /// record is left untouched.
    async fn transition(
        &self,
        job_id: Uuid,
        to: JobStatus,
        fields: TransitionFields,
    ) -> Result<Job, JobStoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Job, JobStoreError>;

    /// Jobs not yet `completed` or `failed`, oldest first.
    async fn list_unfinished(&self) -> Result<Vec<Job>, JobStoreError>;
}
