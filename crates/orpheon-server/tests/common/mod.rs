//! Shared test infrastructure
//!
//! Provides a PostgreSQL container for job store tests and in-process fakes
//! for the extractor, processing service and object store used by the
//! orchestrator tests.

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

use orpheon_server::extract::{ExtractError, ExtractedMedia, MediaExtractor, MediaMetadata};
use orpheon_server::processing::{
    ArtifactMetadata, ProcessingError, ProcessingResult, ProcessingService,
};
use orpheon_server::storage::{
    bytes_body, MemoryStorage, ObjectStore, ObjectStream, PutOptions, PutReceipt, StorageError,
};

/// PostgreSQL container with migrations applied
///
/// The container is stopped when this value is dropped.
pub struct TestPostgres {
    #[allow(unused)]
    container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&format!("postgresql://postgres:postgres@{host}:{port}/postgres"))
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self { container, pool })
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }
}

pub const AUDIO: &[u8] = b"\x1a\x45\xdf\xa3 fake webm audio payload";

/// Extractor whose behavior is chosen by the source reference
///
/// - `good-url`: a small audio stream with known size
/// - `chunked-url`: 64 KiB in 1 KiB chunks, size unknown up front
/// - `huge-url`: announces 1 GiB
/// - `broken-url`: the stream fails after its first chunk
/// - `slow-url`: like `good-url` after a 200ms delay
/// - `hang-url`: never resolves
/// - `panic-url`: panics
/// - anything else: `UnresolvableSource`
pub struct FakeExtractor;

fn audio_media(size: Option<u64>, chunks: Vec<std::io::Result<Vec<u8>>>) -> ExtractedMedia {
    ExtractedMedia {
        stream: futures::stream::iter(chunks).boxed(),
        size_bytes: size,
        mime_type: "audio/webm".to_string(),
        metadata: MediaMetadata {
            title: Some("Test Track".to_string()),
            duration_secs: Some(12.5),
            codec: Some("opus".to_string()),
        },
    }
}

#[async_trait]
impl MediaExtractor for FakeExtractor {
    async fn resolve(&self, source_ref: &str) -> Result<ExtractedMedia, ExtractError> {
        match source_ref {
            "good-url" => Ok(audio_media(Some(AUDIO.len() as u64), vec![Ok(AUDIO.to_vec())])),
            "chunked-url" => Ok(audio_media(None, (0..64).map(|_| Ok(vec![7u8; 1024])).collect())),
            "huge-url" => Ok(audio_media(Some(1 << 30), vec![Ok(AUDIO.to_vec())])),
            "broken-url" => Ok(audio_media(
                None,
                vec![
                    Ok(AUDIO.to_vec()),
                    Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
                ],
            )),
            "slow-url" => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(audio_media(Some(AUDIO.len() as u64), vec![Ok(AUDIO.to_vec())]))
            },
            "hang-url" => futures::future::pending().await,
            "panic-url" => panic!("extractor blew up"),
            other => Err(ExtractError::UnresolvableSource(other.to_string())),
        }
    }
}

/// Processing service that replays scripted outcomes, then accepts
pub struct ScriptedProcessing {
    outcomes: Mutex<VecDeque<Result<ProcessingResult, ProcessingError>>>,
    calls: AtomicU32,
    keys: Mutex<Vec<String>>,
}

impl ScriptedProcessing {
    pub fn accepting() -> Self {
        Self::new(Vec::new())
    }

    pub fn new(outcomes: Vec<Result<ProcessingResult, ProcessingError>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            calls: AtomicU32::new(0),
            keys: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(reason: &str) -> Self {
        Self::new(vec![Err(ProcessingError::RemoteRejected(reason.to_string()))])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn submitted_keys(&self) -> Vec<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessingService for ScriptedProcessing {
    async fn submit(
        &self,
        storage_key: &str,
        metadata: &ArtifactMetadata,
    ) -> Result<ProcessingResult, ProcessingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.keys.lock().unwrap().push(storage_key.to_string());

        match self.outcomes.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(ProcessingResult {
                result_ref: format!("result-{}", metadata.job_id),
                attempts: 1,
            }),
        }
    }
}

/// Object store over [`MemoryStorage`] that counts calls and can be told to
/// fail writes or deletes, or to accept writes that only land later
#[derive(Default)]
pub struct RecordingStorage {
    pub inner: MemoryStorage,
    puts: AtomicU32,
    deletes: AtomicU32,
    fail_puts: AtomicBool,
    fail_deletes: AtomicBool,
    late_landing: Option<Duration>,
}

impl RecordingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_puts(self) -> Self {
        self.fail_puts.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_deletes(self) -> Self {
        self.fail_deletes.store(true, Ordering::SeqCst);
        self
    }

    /// Each `put` reads its body, never returns, and stores the object
    /// `delay` later as if the server finished the write on its own.
    pub fn landing_late(mut self, delay: Duration) -> Self {
        self.late_landing = Some(delay);
        self
    }

    pub fn puts(&self) -> u32 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> u32 {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for RecordingStorage {
    async fn put(
        &self,
        key: &str,
        body: ObjectStream,
        options: PutOptions,
    ) -> Result<PutReceipt, StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("bucket offline".to_string()));
        }

        if let Some(delay) = self.late_landing {
            let data: Vec<u8> = body
                .filter_map(|chunk| futures::future::ready(chunk.ok()))
                .concat()
                .await;
            let inner = self.inner.clone();
            let key = key.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = inner.put(&key, bytes_body(data), options).await;
            });
            return futures::future::pending().await;
        }

        self.inner.put(key, body, options).await
    }

    async fn get(&self, key: &str) -> Result<ObjectStream, StorageError> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("delete refused".to_string()));
        }
        self.inner.delete(key).await
    }
}

/// Poll `check` every 10ms until it returns true or `timeout` passes.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

