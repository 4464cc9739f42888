use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::config::ProcessingConfig;
use super::protocol::{
    ArtifactMetadata, ProcessRequest, ProcessResponse, ProcessStatus, PROCESS_PATH,
    PROTOCOL_HEADER, PROTOCOL_VERSION,
};
use super::retry::RetryPolicy;
use super::{ProcessingError, ProcessingResult, ProcessingService};

/// One request/response exchange with the processing service
#[async_trait]
pub trait ProcessingTransport: Send + Sync {
    async fn call(
        &self,
        request: &ProcessRequest,
        deadline: Duration,
    ) -> Result<ProcessResponse, ProcessingError>;
}

/// JSON over HTTP transport
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
}

impl HttpTransport {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        let url = Url::parse(&format!("{}{}", endpoint.trim_end_matches('/'), PROCESS_PATH))
            .map_err(|e| anyhow::anyhow!("Invalid PROCESSING_ENDPOINT '{}': {}", endpoint, e))?;

        Ok(Self {
            client: reqwest::Client::builder().build()?,
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

fn transport_error(err: reqwest::Error) -> ProcessingError {
    if err.is_timeout() {
        ProcessingError::DeadlineExceeded
    } else if err.is_decode() {
        ProcessingError::RemoteRejected(format!("undecodable response: {err}"))
    } else {
        ProcessingError::RemoteUnavailable(err.to_string())
    }
}

#[async_trait]
impl ProcessingTransport for HttpTransport {
    async fn call(
        &self,
        request: &ProcessRequest,
        deadline: Duration,
    ) -> Result<ProcessResponse, ProcessingError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(PROTOCOL_HEADER, PROTOCOL_VERSION.to_string())
            .timeout(deadline)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProcessingError::RemoteUnavailable(format!(
                "service returned {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProcessingError::RemoteRejected(format!(
                "service returned {status}: {}",
                body.trim()
            )));
        }

        response.json::<ProcessResponse>().await.map_err(transport_error)
    }
}

/// Processing client with a per-attempt deadline and bounded retry of
/// `RemoteUnavailable`
pub struct ProcessingClient<T> {
    transport: T,
    deadline: Duration,
    retry: RetryPolicy,
}

impl ProcessingClient<HttpTransport> {
    pub fn from_config(config: &ProcessingConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            HttpTransport::new(&config.endpoint)?,
            config.deadline,
            config.retry.clone(),
        ))
    }
}

impl<T: ProcessingTransport> ProcessingClient<T> {
    pub fn new(transport: T, deadline: Duration, retry: RetryPolicy) -> Self {
        Self {
            transport,
            deadline,
            retry,
        }
    }

    async fn attempt(&self, request: &ProcessRequest) -> Result<String, ProcessingError> {
        let response = tokio::time::timeout(self.deadline, self.transport.call(request, self.deadline))
            .await
            .map_err(|_| ProcessingError::DeadlineExceeded)??;

        match response.status {
            ProcessStatus::Error => Err(ProcessingError::RemoteRejected(if response.message.is_empty() {
                "no reason given".to_string()
            } else {
                response.message
            })),
            ProcessStatus::Ok if response.result_ref.is_empty() => Err(
                ProcessingError::RemoteRejected("ok response without result_ref".to_string()),
            ),
            ProcessStatus::Ok => Ok(response.result_ref),
        }
    }
}

#[async_trait]
impl<T: ProcessingTransport> ProcessingService for ProcessingClient<T> {
    #[instrument(skip(self, metadata), fields(job_id = %metadata.job_id))]
    async fn submit(
        &self,
        storage_key: &str,
        metadata: &ArtifactMetadata,
    ) -> Result<ProcessingResult, ProcessingError> {
        let request = ProcessRequest {
            storage_key: storage_key.to_string(),
            metadata: metadata.to_wire(),
        };

        let mut attempts = 0;
        loop {
            attempts += 1;
            debug!(attempt = attempts, "Calling processing service");

            match self.attempt(&request).await {
                Ok(result_ref) => {
                    info!(attempts, result_ref = %result_ref, "Processing accepted artifact");
                    return Ok(ProcessingResult {
                        result_ref,
                        attempts,
                    });
                },
                Err(ProcessingError::RemoteUnavailable(reason))
                    if self.retry.should_retry(attempts) =>
                {
                    let delay = self.retry.next_delay(attempts);
                    warn!(
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Processing service unavailable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(err) => {
                    warn!(attempts, error = %err, "Processing call failed");
                    return Err(err);
                },
            }
        }
    }
}
