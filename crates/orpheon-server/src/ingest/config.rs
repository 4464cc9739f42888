use std::env;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::env_or;
use crate::storage::config::DEFAULT_KEY_PREFIX;

pub const DEFAULT_EXTRACTION_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 4;
pub const DEFAULT_UPLOAD_SETTLE_DELAY_SECS: u64 = 30;

/// Largest pipeline count the permit semaphore and shutdown drain can hold
pub const MAX_CONCURRENT_JOBS_LIMIT: usize = if (u32::MAX as usize) < Semaphore::MAX_PERMITS {
    u32::MAX as usize
} else {
    Semaphore::MAX_PERMITS
};

/// What happens to a job's artifact once the job is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    #[default]
    Keep,
    DeleteOnCompletion,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bounds the whole `resolve` call
    pub extraction_timeout: Duration,
    /// Bounds draining the media stream into storage
    pub upload_timeout: Duration,
    pub max_artifact_bytes: u64,
    pub max_concurrent_jobs: usize,
    /// Wait before re-deleting the key of an abandoned upload, in case the
    /// write lands after the compensating delete
    pub upload_settle_delay: Duration,
    /// Object key prefix, `<prefix>/<job_id>/artifact`
    pub key_prefix: String,
    pub retention: RetentionPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extraction_timeout: Duration::from_secs(DEFAULT_EXTRACTION_TIMEOUT_SECS),
            upload_timeout: Duration::from_secs(DEFAULT_UPLOAD_TIMEOUT_SECS),
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            upload_settle_delay: Duration::from_secs(DEFAULT_UPLOAD_SETTLE_DELAY_SECS),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            retention: RetentionPolicy::Keep,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let retention = match env::var("PIPELINE_RETENTION")
            .unwrap_or_else(|_| "keep".to_string())
            .to_lowercase()
            .as_str()
        {
            "keep" => RetentionPolicy::Keep,
            "delete" | "delete_on_completion" => RetentionPolicy::DeleteOnCompletion,
            other => anyhow::bail!("Unknown PIPELINE_RETENTION: {}", other),
        };

        Ok(Self {
            extraction_timeout: Duration::from_secs(env_or(
                "PIPELINE_EXTRACTION_TIMEOUT",
                DEFAULT_EXTRACTION_TIMEOUT_SECS,
            )?),
            upload_timeout: Duration::from_secs(env_or(
                "PIPELINE_UPLOAD_TIMEOUT",
                DEFAULT_UPLOAD_TIMEOUT_SECS,
            )?),
            max_artifact_bytes: env_or("PIPELINE_MAX_ARTIFACT_BYTES", DEFAULT_MAX_ARTIFACT_BYTES)?,
            max_concurrent_jobs: env_or("PIPELINE_MAX_CONCURRENT_JOBS", DEFAULT_MAX_CONCURRENT_JOBS)?,
            upload_settle_delay: Duration::from_secs(env_or(
                "PIPELINE_UPLOAD_SETTLE_DELAY",
                DEFAULT_UPLOAD_SETTLE_DELAY_SECS,
            )?),
            key_prefix: defaults.key_prefix,
            retention,
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_jobs == 0 {
            anyhow::bail!("PIPELINE_MAX_CONCURRENT_JOBS must be greater than 0");
        }
        if self.max_concurrent_jobs > MAX_CONCURRENT_JOBS_LIMIT {
            anyhow::bail!(
                "PIPELINE_MAX_CONCURRENT_JOBS must be at most {}",
                MAX_CONCURRENT_JOBS_LIMIT
            );
        }
        if self.max_artifact_bytes == 0 {
            anyhow::bail!("PIPELINE_MAX_ARTIFACT_BYTES must be greater than 0");
        }
        if self.extraction_timeout.is_zero() || self.upload_timeout.is_zero() {
            anyhow::bail!("Pipeline timeouts must be greater than 0");
        }
        Ok(())
    }
}
