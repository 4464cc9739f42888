//! Storage gateway
//!
//! Key-addressed put/get/delete of binary artifacts. The orchestrator only sees
//! the [`ObjectStore`] trait; [`S3Storage`] talks to any S3-compatible service
//! and [`MemoryStorage`] keeps objects in process.
//!
//! Bodies move as [`ObjectStream`]s in both directions. `put` consumes its
//! stream incrementally and enforces the size cap while reading, so an
//! oversized or failing source never becomes a visible object.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub mod config;
pub mod memory;
pub mod s3;

pub use config::{StorageBackend, StorageConfig};
pub use memory::MemoryStorage;
pub use s3::S3Storage;

/// Chunked object body
pub type ObjectStream = BoxStream<'static, std::io::Result<Vec<u8>>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("object exceeds {0} bytes")]
    TooLarge(u64),

    #[error("body stream failed: {0}")]
    Source(String),
}

impl StorageError {
    /// Error kind name as recorded in a job's `error_detail`.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::NotFound(_) => "NotFound",
            StorageError::Unavailable(_) => "StorageUnavailable",
            StorageError::TooLarge(_) => "ArtifactTooLarge",
            StorageError::Source(_) => "UnresolvableSource",
        }
    }
}

/// Acknowledgement of a completed `put`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReceipt {
    pub key: String,
    /// Hex-encoded SHA-256 of the stored bytes
    pub checksum: String,
    pub size: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub content_type: Option<String>,
    /// Abort with [`StorageError::TooLarge`] once the body passes this size
    pub max_bytes: Option<u64>,
}

impl PutOptions {
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` under `key`. Either the whole object becomes visible or
    /// nothing does; a body that fails or passes `max_bytes` leaves the key
    /// untouched.
    async fn put(
        &self,
        key: &str,
        body: ObjectStream,
        options: PutOptions,
    ) -> Result<PutReceipt, StorageError>;

    async fn get(&self, key: &str) -> Result<ObjectStream, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Read a whole object into memory.
    async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let body = self.get(key).await?;
        body.try_fold(Vec::new(), |mut data, chunk| async move {
            data.extend_from_slice(&chunk);
            Ok(data)
        })
        .await
        .map_err(|e| StorageError::Unavailable(format!("read body of {key}: {e}")))
    }
}

/// Build the configured object store.
pub fn connect(config: StorageConfig) -> Arc<dyn ObjectStore> {
    match config.backend {
        StorageBackend::S3 => Arc::new(S3Storage::new(config)),
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
    }
}

/// Object key for a job's artifact: `<prefix>/<job_id>/artifact`.
pub fn artifact_key(prefix: &str, job_id: Uuid) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{job_id}/artifact")
    } else {
        format!("{prefix}/{job_id}/artifact")
    }
}

/// Single-chunk body over an in-memory buffer
pub fn bytes_body(data: impl Into<Vec<u8>>) -> ObjectStream {
    stream::iter([Ok(data.into())]).boxed()
}

/// Reads a put body in parts, hashing and counting as it goes
pub(crate) struct BodyReader {
    body: ObjectStream,
    hasher: Sha256,
    size: u64,
    limit: Option<u64>,
    done: bool,
}

impl BodyReader {
    pub(crate) fn new(body: ObjectStream, limit: Option<u64>) -> Self {
        Self {
            body,
            hasher: Sha256::new(),
            size: 0,
            limit,
            done: false,
        }
    }

    /// Next part of at least `target` bytes, shorter only at end of body.
    pub(crate) async fn read_part(&mut self, target: usize) -> Result<Vec<u8>, StorageError> {
        let mut part = Vec::new();

        while part.len() < target {
            let Some(chunk) = self.body.next().await else {
                self.done = true;
                break;
            };
            let chunk = chunk.map_err(|e| StorageError::Source(e.to_string()))?;

            let size = self.size + chunk.len() as u64;
            if let Some(limit) = self.limit.filter(|limit| size > *limit) {
                return Err(StorageError::TooLarge(limit));
            }
            self.size = size;
            self.hasher.update(&chunk);
            part.extend_from_slice(&chunk);
        }

        Ok(part)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn into_receipt(self, key: &str) -> PutReceipt {
        PutReceipt {
            key: key.to_string(),
            checksum: format!("{:x}", self.hasher.finalize()),
            size: self.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: Vec<std::io::Result<Vec<u8>>>) -> ObjectStream {
        stream::iter(parts).boxed()
    }

    #[tokio::test]
    async fn test_body_reader_checksum() {
        let body = chunks(vec![Ok(b"Hello, ".to_vec()), Ok(b"World!".to_vec())]);
        let mut reader = BodyReader::new(body, None);

        let part = reader.read_part(usize::MAX).await.unwrap();
        assert_eq!(part, b"Hello, World!");
        assert!(reader.is_done());

        let receipt = reader.into_receipt("k");
        assert_eq!(receipt.size, 13);
        assert_eq!(
            receipt.checksum,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );
    }

    #[tokio::test]
    async fn test_body_reader_parts() {
        let body = chunks((0..5).map(|_| Ok(vec![1u8; 4])).collect());
        let mut reader = BodyReader::new(body, None);

        assert_eq!(reader.read_part(8).await.unwrap().len(), 8);
        assert!(!reader.is_done());
        assert_eq!(reader.read_part(8).await.unwrap().len(), 8);
        assert_eq!(reader.read_part(8).await.unwrap().len(), 4);
        assert!(reader.is_done());
    }

    #[tokio::test]
    async fn test_body_reader_enforces_limit() {
        let body = chunks(vec![Ok(vec![0u8; 6]), Ok(vec![0u8; 6])]);
        let mut reader = BodyReader::new(body, Some(10));

        assert_eq!(reader.read_part(usize::MAX).await, Err(StorageError::TooLarge(10)));
    }

    #[tokio::test]
    async fn test_body_reader_source_error() {
        let body = chunks(vec![
            Ok(vec![0u8; 2]),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
        ]);
        let mut reader = BodyReader::new(body, None);

        let err = reader.read_part(usize::MAX).await.unwrap_err();
        assert!(matches!(err, StorageError::Source(_)));
        assert_eq!(err.kind(), "UnresolvableSource");
    }

    #[test]
    fn test_artifact_key() {
        let id = Uuid::nil();
        assert_eq!(
            artifact_key("media", id),
            "media/00000000-0000-0000-0000-000000000000/artifact"
        );
        assert_eq!(
            artifact_key("/media/", id),
            "media/00000000-0000-0000-0000-000000000000/artifact"
        );
        assert_eq!(
            artifact_key("", id),
            "00000000-0000-0000-0000-000000000000/artifact"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(StorageError::NotFound("k".into()).kind(), "NotFound");
        assert_eq!(
            StorageError::Unavailable("down".into()).kind(),
            "StorageUnavailable"
        );
        assert_eq!(StorageError::TooLarge(1).kind(), "ArtifactTooLarge");
    }
}
