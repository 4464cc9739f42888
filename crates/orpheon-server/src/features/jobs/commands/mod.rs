//! Job commands

pub mod cancel_job;
pub mod submit_job;

pub use cancel_job::{CancelJobCommand, CancelJobError, CancelJobResponse};
pub use submit_job::{SubmitJobCommand, SubmitJobError, SubmitJobResponse};
