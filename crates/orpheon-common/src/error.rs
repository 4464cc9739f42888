//! Error types for Orpheon

use thiserror::Error;

/// Result type alias for Orpheon operations
pub type Result<T> = std::result::Result<T, OrpheonError>;

/// Errors shared across workspace members
#[derive(Error, Debug)]
pub enum OrpheonError {
    #[error("Unknown job status: {0}")]
    UnknownStatus(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
