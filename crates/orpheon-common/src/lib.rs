//! Orpheon Common Library
//!
//! Shared types and utilities for the Orpheon workspace.
//!
//! # Overview
//!
//! - **Jobs**: the ingestion job record and its lifecycle state machine
//! - **Error Handling**: error types shared by every workspace member
//! - **Logging**: tracing subscriber setup driven by environment variables
//!
//! # Example
//!
//! ```
//! use orpheon_common::job::JobStatus;
//!
//! assert!(JobStatus::Pending.can_transition_to(JobStatus::Extracting));
//! assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod job;
pub mod logging;

// Re-export commonly used types
pub use error::{OrpheonError, Result};
pub use job::{Job, JobStatus};
