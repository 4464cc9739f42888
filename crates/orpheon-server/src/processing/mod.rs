//! External processing client
//!
//! Sends a stored artifact's key and metadata to the processing service and
//! returns the service's result reference. Each attempt has a fixed deadline;
//! only `RemoteUnavailable` is retried, with bounded exponential backoff.

use async_trait::async_trait;
use thiserror::Error;

pub mod client;
pub mod config;
pub mod protocol;
pub mod retry;

pub use client::{HttpTransport, ProcessingClient, ProcessingTransport};
pub use config::ProcessingConfig;
pub use protocol::ArtifactMetadata;
pub use retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessingError {
    #[error("processing service unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("processing service rejected the request: {0}")]
    RemoteRejected(String),

    #[error("processing call exceeded its deadline")]
    DeadlineExceeded,
}

impl ProcessingError {
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessingError::RemoteUnavailable(_) => "RemoteUnavailable",
            ProcessingError::RemoteRejected(_) => "RemoteRejected",
            ProcessingError::DeadlineExceeded => "DeadlineExceeded",
        }
    }

    /// Text recorded in a failed job's `error_detail`
    pub fn error_detail(&self) -> String {
        match self {
            ProcessingError::RemoteRejected(reason) => format!("RemoteRejected: {reason}"),
            other => other.kind().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingResult {
    pub result_ref: String,
    /// Attempts made, including the successful one
    pub attempts: u32,
}

#[async_trait]
pub trait ProcessingService: Send + Sync {
    async fn submit(
        &self,
        storage_key: &str,
        metadata: &ArtifactMetadata,
    ) -> Result<ProcessingResult, ProcessingError>;
}
