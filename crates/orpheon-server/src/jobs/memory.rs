use async_trait::async_trait;
use chrono::Utc;
use orpheon_common::job::{Job, JobStatus, TransitionFields};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{JobStore, JobStoreError};

/// Job store held in process memory, one mutex per job
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Arc<Mutex<Job>>>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record as-is, bypassing the state machine. Used to seed
    /// jobs left behind by an earlier process.
    pub async fn insert(&self, job: Job) {
        self.jobs
            .write()
            .await
            .insert(job.id, Arc::new(Mutex::new(job)));
    }

    async fn slot(&self, job_id: Uuid) -> Result<Arc<Mutex<Job>>, JobStoreError> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(JobStoreError::NotFound(job_id))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, source_ref: &str) -> Result<Uuid, JobStoreError> {
        let job = Job::new(source_ref, Utc::now());
        let id = job.id;
        self.insert(job).await;
        Ok(id)
    }

    async fn transition(
        &self,
        job_id: Uuid,
        to: JobStatus,
        fields: TransitionFields,
    ) -> Result<Job, JobStoreError> {
        let slot = self.slot(job_id).await?;
        let mut job = slot.lock().await;
        let next = job.apply_transition(to, fields, Utc::now())?;
        *job = next.clone();
        Ok(next)
    }

    async fn get(&self, job_id: Uuid) -> Result<Job, JobStoreError> {
        let slot = self.slot(job_id).await?;
        let job = slot.lock().await;
        Ok(job.clone())
    }

    async fn list_unfinished(&self) -> Result<Vec<Job>, JobStoreError> {
        let slots: Vec<_> = self.jobs.read().await.values().cloned().collect();
        let mut unfinished = Vec::new();
        for slot in slots {
            let job = slot.lock().await;
            if !job.status.is_terminal() {
                unfinished.push(job.clone());
            }
        }
        unfinished.sort_by_key(|job| job.created_at);
        Ok(unfinished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryJobStore::new();
        let id = store.create("https://example.com/a").await.unwrap();

        let job = store.get(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.source_ref, "https://example.com/a");
        assert!(job.invariants_hold());
    }

    #[tokio::test]
    async fn test_invalid_transition_leaves_job_unchanged() {
        let store = MemoryJobStore::new();
        let id = store.create("src").await.unwrap();
        let before = store.get(id).await.unwrap();

        let err = store
            .transition(id, JobStatus::Completed, TransitionFields::result_ref("r"))
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::InvalidTransition(_)));
        assert_eq!(store.get(id).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let store = MemoryJobStore::new();
        let id = store.create("src").await.unwrap();

        store
            .transition(id, JobStatus::Extracting, TransitionFields::none())
            .await
            .unwrap();
        store
            .transition(id, JobStatus::Uploading, TransitionFields::none())
            .await
            .unwrap();
        store
            .transition(id, JobStatus::Processing, TransitionFields::storage_key("media/k"))
            .await
            .unwrap();
        let done = store
            .transition(id, JobStatus::Completed, TransitionFields::result_ref("res-1"))
            .await
            .unwrap();

        assert_eq!(done.storage_key.as_deref(), Some("media/k"));
        assert_eq!(done.result_ref.as_deref(), Some("res-1"));
        assert!(store.list_unfinished().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let store = MemoryJobStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(store.get(id).await, Err(JobStoreError::NotFound(i)) if i == id));
        assert!(matches!(
            store
                .transition(id, JobStatus::Extracting, TransitionFields::none())
                .await,
            Err(JobStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_transitions_only_one_wins() {
        let store = MemoryJobStore::new();
        let id = store.create("src").await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .transition(id, JobStatus::Extracting, TransitionFields::none())
                        .await
                })
            })
            .collect();

        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
    }
}
