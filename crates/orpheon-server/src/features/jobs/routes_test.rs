//! Tests for job routes
//!
//! The router runs against in-memory stores and a canned extractor and
//! processing service.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use futures::StreamExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::extract::{ExtractError, ExtractedMedia, MediaExtractor, MediaMetadata};
    use crate::features::jobs::jobs_routes;
    use crate::ingest::{IngestionOrchestrator, PipelineConfig};
    use crate::jobs::MemoryJobStore;
    use crate::processing::{
        ArtifactMetadata, ProcessingError, ProcessingResult, ProcessingService,
    };
    use crate::storage::MemoryStorage;

    struct CannedExtractor;

    #[async_trait]
    impl MediaExtractor for CannedExtractor {
        async fn resolve(&self, source_ref: &str) -> Result<ExtractedMedia, ExtractError> {
            if source_ref == "slow-url" {
                tokio::time::sleep(Duration::from_millis(300)).await;
            } else if source_ref != "good-url" {
                return Err(ExtractError::UnresolvableSource(source_ref.to_string()));
            }
            Ok(ExtractedMedia {
                stream: futures::stream::iter(vec![Ok(b"audio".to_vec())]).boxed(),
                size_bytes: Some(5),
                mime_type: "audio/webm".to_string(),
                metadata: MediaMetadata::default(),
            })
        }
    }

    struct AcceptAll;

    #[async_trait]
    impl ProcessingService for AcceptAll {
        async fn submit(
            &self,
            _storage_key: &str,
            metadata: &ArtifactMetadata,
        ) -> Result<ProcessingResult, ProcessingError> {
            Ok(ProcessingResult {
                result_ref: format!("result-{}", metadata.job_id),
                attempts: 1,
            })
        }
    }

    fn create_test_router() -> Router {
        let orchestrator = IngestionOrchestrator::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(MemoryStorage::new()),
            Arc::new(CannedExtractor),
            Arc::new(AcceptAll),
            PipelineConfig::default(),
        );
        jobs_routes().with_state(orchestrator)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn wait_for_terminal(app: &Router, job_id: &str) -> Value {
        for _ in 0..200 {
            let response = app
                .clone()
                .oneshot(get(&format!("/jobs/{job_id}")))
                .await
                .unwrap();
            let body = body_json(response).await;
            let status = body["data"]["status"].as_str().unwrap_or_default().to_string();
            if status == "completed" || status == "failed" {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    #[tokio::test]
    async fn test_submit_returns_accepted_with_job_id() {
        let app = create_test_router();

        let response = app
            .clone()
            .oneshot(post_json("/jobs", json!({"source_ref": "good-url"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = body_json(response).await;
        let job_id = body["data"]["job_id"].as_str().unwrap().to_string();
        assert!(Uuid::parse_str(&job_id).is_ok());

        let done = wait_for_terminal(&app, &job_id).await;
        assert_eq!(done["data"]["status"], "completed");
        assert!(done["data"]["storage_key"].is_string());
        assert!(done["data"]["error_detail"].is_null());
    }

    #[tokio::test]
    async fn test_failed_job_is_visible_through_status() {
        let app = create_test_router();

        let response = app
            .clone()
            .oneshot(post_json("/jobs", json!({"source_ref": "bad-url"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let job_id = body_json(response).await["data"]["job_id"]
            .as_str()
            .unwrap()
            .to_string();

        let done = wait_for_terminal(&app, &job_id).await;
        assert_eq!(done["data"]["status"], "failed");
        assert_eq!(done["data"]["error_detail"], "UnresolvableSource");
        assert!(done["data"]["storage_key"].is_null());
    }

    #[tokio::test]
    async fn test_submit_rejects_empty_source_ref() {
        let app = create_test_router();

        let response = app
            .oneshot(post_json("/jobs", json!({"source_ref": ""})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"]["status"], 400);
    }

    #[tokio::test]
    async fn test_get_job_not_found() {
        let app = create_test_router();

        let response = app
            .oneshot(get(&format!("/jobs/{}", Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_job_invalid_id() {
        let app = create_test_router();

        let response = app.oneshot(get("/jobs/not-a-uuid")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_running_then_terminal() {
        let app = create_test_router();

        let response = app
            .clone()
            .oneshot(post_json("/jobs", json!({"source_ref": "slow-url"})))
            .await
            .unwrap();
        let job_id = body_json(response).await["data"]["job_id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .clone()
            .oneshot(post_json(&format!("/jobs/{job_id}/cancel"), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let done = wait_for_terminal(&app, &job_id).await;
        assert_eq!(done["data"]["status"], "failed");
        assert_eq!(done["data"]["error_detail"], "cancelled");

        let response = app
            .oneshot(post_json(&format!("/jobs/{job_id}/cancel"), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_cancel_unknown_job() {
        let app = create_test_router();

        let response = app
            .oneshot(post_json(&format!("/jobs/{}/cancel", Uuid::new_v4()), json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
