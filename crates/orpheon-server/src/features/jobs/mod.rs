//! Jobs feature module
//!
//! Submit media for ingestion, poll a job, request cancellation.

pub mod commands;
pub mod queries;
pub mod routes;

#[cfg(test)]
mod routes_test;

pub use routes::jobs_routes;
