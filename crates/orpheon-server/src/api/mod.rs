//! HTTP surface
//!
//! Health check at the root, feature routes under `/api/v1`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;
use tower_http::compression::CompressionLayer;

use crate::config::CorsConfig;
use crate::features;
use crate::ingest::IngestionOrchestrator;
use crate::middleware;

pub mod response;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: IngestionOrchestrator,
    /// Pool backing the job store; `None` when jobs live in memory
    pub db: Option<PgPool>,
}

/// Create the application router with all routes and middleware
pub fn create_router(state: AppState, cors: &CorsConfig) -> Router {
    let feature_routes = features::router(state.orchestrator.clone());

    Router::new()
        .route("/health", get(health_check))
        .with_state(state)
        .nest("/api/v1", feature_routes)
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::propagate_request_id_layer())
        .layer(middleware::set_request_id_layer())
        .layer(middleware::cors_layer(cors))
}

/// Health check handler
async fn health_check(State(state): State<AppState>) -> Result<Response, StatusCode> {
    let Some(db) = &state.db else {
        return Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "not_configured"
            })),
        )
            .into_response());
    };

    match sqlx::query("SELECT 1").fetch_one(db).await {
        Ok(_) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        },
    }
}
