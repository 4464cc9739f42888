//! Job routes
//!
//! These endpoints do NOT require authentication.

use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use super::commands::{
    cancel_job::handle as handle_cancel_job, submit_job::handle as handle_submit_job,
    CancelJobCommand, CancelJobError, SubmitJobCommand, SubmitJobError,
};
use super::queries::{get_job::handle as handle_get_job, GetJobError, GetJobQuery};
use crate::api::response::ApiResponse;
use crate::error::AppError;
use crate::ingest::IngestionOrchestrator;

/// Create job routes
pub fn jobs_routes() -> Router<IngestionOrchestrator> {
    Router::new()
        .route("/jobs", post(submit_job))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/cancel", post(cancel_job))
}

fn parse_job_id(raw: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(raw).map_err(|_| AppError::Validation(format!("invalid job id: {raw}")))
}

/// Submit a media source
///
/// POST /jobs {"source_ref": "..."}
async fn submit_job(
    State(orchestrator): State<IngestionOrchestrator>,
    Json(command): Json<SubmitJobCommand>,
) -> Result<Response, AppError> {
    match handle_submit_job(&orchestrator, command).await {
        Ok(response) => Ok(ApiResponse::accepted(response).into_response()),
        Err(SubmitJobError::Orchestrator(e)) => Err(e.into()),
        Err(e) => Err(AppError::Validation(e.to_string())),
    }
}

/// Get a specific job by ID
///
/// GET /jobs/:job_id
async fn get_job(
    State(orchestrator): State<IngestionOrchestrator>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    let query = GetJobQuery {
        job_id: parse_job_id(&job_id)?,
    };

    match handle_get_job(&orchestrator, query).await {
        Ok(job) => Ok(ApiResponse::success(job).into_response()),
        Err(GetJobError::NotFound) => Err(AppError::NotFound(format!("job {job_id}"))),
        Err(GetJobError::Store(e)) => Err(e.into()),
    }
}

/// Request cancellation of a running job
///
/// POST /jobs/:job_id/cancel
async fn cancel_job(
    State(orchestrator): State<IngestionOrchestrator>,
    Path(job_id): Path<String>,
) -> Result<Response, AppError> {
    let command = CancelJobCommand {
        job_id: parse_job_id(&job_id)?,
    };

    match handle_cancel_job(&orchestrator, command).await {
        Ok(response) => Ok(ApiResponse::accepted(response).into_response()),
        Err(CancelJobError::NotFound) => Err(AppError::NotFound(format!("job {job_id}"))),
        Err(e @ (CancelJobError::AlreadyTerminal(_) | CancelJobError::NotRunning)) => {
            Err(AppError::Conflict(e.to_string()))
        },
        Err(CancelJobError::Orchestrator(e)) => Err(e.into()),
    }
}
