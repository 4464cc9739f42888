//! Ingestion job record and lifecycle state machine
//!
//! A job moves along `pending → extracting → uploading → processing → completed`.
//! `failed` is reachable from every non-terminal status. `completed` and `failed`
//! are terminal.
//!
//! [`Job::apply_transition`] is the single place where a status change and its
//! accompanying fields are validated. Every job store calls it before writing, so
//! the rules hold no matter which backend persists the record:
//!
//! - `storage_key` is set exactly when the status is `processing` or `completed`
//! - `result_ref` is set exactly when the status is `completed`
//! - `error_detail` is set exactly when the status is `failed`
//! - `cleanup_error` may only be set together with `failed`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::error::OrpheonError;

/// Lifecycle status of an ingestion job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Extracting,
    Uploading,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    /// All statuses in pipeline order, `failed` last.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Extracting,
        JobStatus::Uploading,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Extracting => "extracting",
            JobStatus::Uploading => "uploading",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// The next status on the success path, if any.
    pub fn next(&self) -> Option<JobStatus> {
        match self {
            JobStatus::Pending => Some(JobStatus::Extracting),
            JobStatus::Extracting => Some(JobStatus::Uploading),
            JobStatus::Uploading => Some(JobStatus::Processing),
            JobStatus::Processing => Some(JobStatus::Completed),
            JobStatus::Completed | JobStatus::Failed => None,
        }
    }

    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        target == JobStatus::Failed || self.next() == Some(target)
    }

    /// Whether a job in this status must reference a stored artifact.
    pub fn holds_artifact(&self) -> bool {
        matches!(self, JobStatus::Processing | JobStatus::Completed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = OrpheonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "extracting" => Ok(JobStatus::Extracting),
            "uploading" => Ok(JobStatus::Uploading),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(OrpheonError::UnknownStatus(other.to_string())),
        }
    }
}

/// One unit of media ingestion work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub source_ref: String,
    pub status: JobStatus,
    pub storage_key: Option<String>,
    pub result_ref: Option<String>,
    pub error_detail: Option<String>,
    /// Set when the compensating delete of a failed job's artifact did not succeed.
    pub cleanup_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields written together with a status change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionFields {
    pub storage_key: Option<String>,
    pub result_ref: Option<String>,
    pub error_detail: Option<String>,
    pub cleanup_error: Option<String>,
}

impl TransitionFields {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn storage_key(key: impl Into<String>) -> Self {
        Self {
            storage_key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn result_ref(result_ref: impl Into<String>) -> Self {
        Self {
            result_ref: Some(result_ref.into()),
            ..Self::default()
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            error_detail: Some(detail.into()),
            ..Self::default()
        }
    }

    pub fn with_cleanup_error(mut self, cleanup_error: impl Into<String>) -> Self {
        self.cleanup_error = Some(cleanup_error.into());
        self
    }
}

/// A rejected status change
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition {from} -> {to}: {reason}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
    pub reason: String,
}

impl Job {
    /// Create a new job in `pending`.
    pub fn new(source_ref: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_ref: source_ref.into(),
            status: JobStatus::Pending,
            storage_key: None,
            result_ref: None,
            error_detail: None,
            cleanup_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Compute the record that results from moving this job to `to`.
    ///
    /// `self` is never modified; on error the stored job stays as it was.
    pub fn apply_transition(
        &self,
        to: JobStatus,
        fields: TransitionFields,
        now: DateTime<Utc>,
    ) -> Result<Job, TransitionError> {
        let reject = |reason: &str| TransitionError {
            from: self.status,
            to,
            reason: reason.to_string(),
        };

        if !self.status.can_transition_to(to) {
            return Err(reject("edge not allowed by the job state machine"));
        }

        let mut next = self.clone();
        next.status = to;
        next.updated_at = now.max(self.updated_at);

        match to {
            JobStatus::Pending => return Err(reject("no edge leads back to pending")),
            JobStatus::Extracting | JobStatus::Uploading => {
                if fields != TransitionFields::none() {
                    return Err(reject("this status takes no fields"));
                }
            },
            JobStatus::Processing => {
                let key = non_empty(fields.storage_key)
                    .ok_or_else(|| reject("storage_key is required"))?;
                if fields.result_ref.is_some()
                    || fields.error_detail.is_some()
                    || fields.cleanup_error.is_some()
                {
                    return Err(reject("only storage_key may be set"));
                }
                next.storage_key = Some(key);
            },
            JobStatus::Completed => {
                let result_ref = non_empty(fields.result_ref)
                    .ok_or_else(|| reject("result_ref is required"))?;
                if let Some(key) = fields.storage_key {
                    if self.storage_key.as_deref() != Some(key.as_str()) {
                        return Err(reject("storage_key cannot change on completion"));
                    }
                }
                if fields.error_detail.is_some() || fields.cleanup_error.is_some() {
                    return Err(reject("a completed job carries no error"));
                }
                next.result_ref = Some(result_ref);
            },
            JobStatus::Failed => {
                let detail = non_empty(fields.error_detail)
                    .ok_or_else(|| reject("error_detail is required"))?;
                if fields.storage_key.is_some() || fields.result_ref.is_some() {
                    return Err(reject("a failed job references no artifact or result"));
                }
                next.storage_key = None;
                next.error_detail = Some(detail);
                next.cleanup_error = fields.cleanup_error;
            },
        }

        debug_assert!(next.invariants_hold());
        Ok(next)
    }

    /// Whether the field/status invariants hold for this record.
    pub fn invariants_hold(&self) -> bool {
        self.storage_key.is_some() == self.status.holds_artifact()
            && self.result_ref.is_some() == (self.status == JobStatus::Completed)
            && self.error_detail.is_some() == (self.status == JobStatus::Failed)
            && (self.cleanup_error.is_none() || self.status == JobStatus::Failed)
            && self.updated_at >= self.created_at
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
