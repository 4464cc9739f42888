use std::env;
use std::time::Duration;

use super::retry::{
    RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BASE_DELAY_MS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_DELAY_MS,
};
use crate::config::env_or;

pub const DEFAULT_ENDPOINT: &str = "http://localhost:8090";
pub const DEFAULT_DEADLINE_MS: u64 = 30_000;

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    /// Base URL of the processing service
    pub endpoint: String,
    /// Deadline of a single call attempt
    pub deadline: Duration,
    pub retry: RetryPolicy,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            deadline: Duration::from_millis(DEFAULT_DEADLINE_MS),
            retry: RetryPolicy::default(),
        }
    }
}

impl ProcessingConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: env::var("PROCESSING_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
            deadline: Duration::from_millis(env_or(
                "PROCESSING_DEADLINE_MS",
                DEFAULT_DEADLINE_MS,
            )?),
            retry: RetryPolicy {
                max_attempts: env_or("PROCESSING_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?,
                base_delay: Duration::from_millis(env_or(
                    "PROCESSING_BASE_DELAY_MS",
                    DEFAULT_BASE_DELAY_MS,
                )?),
                multiplier: env_or("PROCESSING_BACKOFF_MULTIPLIER", DEFAULT_BACKOFF_MULTIPLIER)?,
                max_delay: Duration::from_millis(env_or(
                    "PROCESSING_MAX_DELAY_MS",
                    DEFAULT_MAX_DELAY_MS,
                )?),
            },
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.deadline.is_zero() {
            anyhow::bail!("PROCESSING_DEADLINE_MS must be greater than 0");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("PROCESSING_MAX_ATTEMPTS must be at least 1");
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            anyhow::bail!("PROCESSING_BACKOFF_MULTIPLIER must be at least 1.0");
        }
        if self.retry.max_delay < self.retry.base_delay {
            anyhow::bail!("PROCESSING_MAX_DELAY_MS must not be below PROCESSING_BASE_DELAY_MS");
        }
        Ok(())
    }
}
