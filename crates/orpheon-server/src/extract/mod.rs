//! Media extraction
//!
//! Resolves a source reference into a single-use byte stream plus what is
//! known about the media up front. Extractors never retry internally.

use async_trait::async_trait;
use thiserror::Error;

pub mod ytdlp;

pub use ytdlp::{ExtractorConfig, YtDlpExtractor};

/// Chunks of media bytes as they arrive from the source, ready to hand to
/// [`ObjectStore::put`](crate::storage::ObjectStore::put)
pub type MediaStream = crate::storage::ObjectStream;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("unresolvable source: {0}")]
    UnresolvableSource(String),

    #[error("extraction timed out")]
    ExtractionTimeout,
}

impl ExtractError {
    /// Error kind name as recorded in a job's `error_detail`.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::UnresolvableSource(_) => "UnresolvableSource",
            ExtractError::ExtractionTimeout => "ExtractionTimeout",
        }
    }
}

/// Descriptive fields reported by the source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaMetadata {
    pub title: Option<String>,
    pub duration_secs: Option<f64>,
    pub codec: Option<String>,
}

/// A resolved source. `stream` can be read once; moving it out consumes it.
pub struct ExtractedMedia {
    pub stream: MediaStream,
    /// Size announced by the source, if it announced one
    pub size_bytes: Option<u64>,
    pub mime_type: String,
    pub metadata: MediaMetadata,
}

impl std::fmt::Debug for ExtractedMedia {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractedMedia")
            .field("size_bytes", &self.size_bytes)
            .field("mime_type", &self.mime_type)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn resolve(&self, source_ref: &str) -> Result<ExtractedMedia, ExtractError>;
}
