use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orpheon_common::job::{Job, JobStatus, TransitionFields};
use sqlx::PgPool;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{JobStore, JobStoreError};

const JOB_COLUMNS: &str = "id, source_ref, status, storage_key, result_ref, error_detail, \
                           cleanup_error, created_at, updated_at";

/// Row shape of `ingestion_jobs`
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    source_ref: String,
    status: String,
    storage_key: Option<String>,
    result_ref: Option<String>,
    error_detail: Option<String>,
    cleanup_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = JobStoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status: JobStatus = row.status.parse().map_err(|e| JobStoreError::Corrupt {
            id: row.id,
            reason: format!("{e}"),
        })?;

        Ok(Job {
            id: row.id,
            source_ref: row.source_ref,
            status,
            storage_key: row.storage_key,
            result_ref: row.result_ref,
            error_detail: row.error_detail,
            cleanup_error: row.cleanup_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// PostgreSQL-backed job store
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self))]
    async fn create(&self, source_ref: &str) -> Result<Uuid, JobStoreError> {
        let job = Job::new(source_ref, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO ingestion_jobs (id, source_ref, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(job.id)
        .bind(&job.source_ref)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %job.id, "Created ingestion job");

        Ok(job.id)
    }

    #[instrument(skip(self, fields))]
    async fn transition(
        &self,
        job_id: Uuid,
        to: JobStatus,
        fields: TransitionFields,
    ) -> Result<Job, JobStoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM ingestion_jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(JobStoreError::NotFound(job_id))?;

        let current = Job::try_from(row)?;
        // Dropping `tx` on a rejected transition rolls back and releases the lock.
        let next = current.apply_transition(to, fields, Utc::now())?;

        let row = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            UPDATE ingestion_jobs
            SET status = $2, storage_key = $3, result_ref = $4, error_detail = $5,
                cleanup_error = $6, updated_at = $7
            WHERE id = $1
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job_id)
        .bind(next.status.as_str())
        .bind(&next.storage_key)
        .bind(&next.result_ref)
        .bind(&next.error_detail)
        .bind(&next.cleanup_error)
        .bind(next.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(job_id = %job_id, from = %current.status, to = %to, "Job transitioned");

        Job::try_from(row)
    }

    async fn get(&self, job_id: Uuid) -> Result<Job, JobStoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM ingestion_jobs WHERE id = $1"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(JobStoreError::NotFound(job_id))?;

        Job::try_from(row)
    }

    async fn list_unfinished(&self) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query_as::<_, JobRow>(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM ingestion_jobs
            WHERE status NOT IN ('completed', 'failed')
            ORDER BY created_at
            "#
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Job::try_from).collect()
    }
}
