//! Orpheon Server Library
//!
//! Media ingestion and external-processing orchestration.
//!
//! # Overview
//!
//! A job takes a media source reference through four components:
//!
//! - **Media Extractor** ([`extract`]): resolves the source into a byte stream
//!   and metadata
//! - **Storage Gateway** ([`storage`]): persists the artifact to S3-compatible
//!   object storage under a key derived from the job id
//! - **External Processing Client** ([`processing`]): hands the stored key and
//!   metadata to the processing service, with deadlines and bounded retry
//! - **Job State Store** ([`jobs`]): durable job records in PostgreSQL
//!
//! The [`ingest`] orchestrator drives each job through its state machine and
//! compensates on failure. Callers observe outcomes only through job status.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use orpheon_server::{
//!     config::Config,
//!     extract::YtDlpExtractor,
//!     ingest::IngestionOrchestrator,
//!     jobs::MemoryJobStore,
//!     processing::ProcessingClient,
//!     storage,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let orchestrator = IngestionOrchestrator::new(
//!         Arc::new(MemoryJobStore::new()),
//!         storage::connect(config.storage.clone()),
//!         Arc::new(YtDlpExtractor::new(config.extractor.clone())?),
//!         Arc::new(ProcessingClient::from_config(&config.processing)?),
//!         config.pipeline.clone(),
//!     );
//!     let job = orchestrator.ingest("https://youtu.be/dQw4w9WgXcQ").await?;
//!     println!("{} -> {}", job.id, job.status);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod extract;
pub mod features;
pub mod ingest;
pub mod jobs;
pub mod middleware;
pub mod processing;
pub mod storage;

// Re-export commonly used types
pub use error::AppError;
