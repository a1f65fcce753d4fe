//! HTTP surface of the relay.
//!
//! # Endpoints
//!
//! - `POST /notifications` - Accepts protocol notifications (returns 202 Accepted)
//! - `GET /api/v1/jobs` - Lists in-flight work log entries as JSON
//! - `GET /api/v1/jobs/{job_id}` - Returns one work log entry, or 404
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

pub mod health;
pub mod jobs;
pub mod notification;
pub mod signature;

pub use health::health_handler;
pub use jobs::{job_handler, list_jobs_handler};
pub use notification::notification_handler;

use crate::effects::{ProtocolInterpreter, ServiceInterpreter};
use crate::engine::Engine;
use crate::gateway::ServiceError;

/// Shared application state, passed to handlers via Axum's `State` extractor.
pub struct AppState<P, S> {
    inner: Arc<AppStateInner<P, S>>,
}

struct AppStateInner<P, S> {
    engine: Arc<Engine<P, S>>,

    /// Secret for HMAC-SHA256 notification signatures. `None` accepts
    /// unsigned notifications.
    notification_secret: Option<Vec<u8>>,
}

impl<P, S> Clone for AppState<P, S> {
    fn clone(&self) -> Self {
        AppState {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, S> AppState<P, S> {
    pub fn new(engine: Arc<Engine<P, S>>, notification_secret: Option<Vec<u8>>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                engine,
                notification_secret,
            }),
        }
    }

    pub fn engine(&self) -> Arc<Engine<P, S>> {
        Arc::clone(&self.inner.engine)
    }

    pub fn notification_secret(&self) -> Option<&[u8]> {
        self.inner.notification_secret.as_deref()
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<P, S>(app_state: AppState<P, S>) -> axum::Router
where
    P: ProtocolInterpreter<Error = ServiceError> + Send + Sync + 'static,
    S: ServiceInterpreter<Error = ServiceError> + Send + Sync + 'static,
{
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/notifications", post(notification_handler::<P, S>))
        .route("/api/v1/jobs", get(list_jobs_handler::<P, S>))
        .route("/api/v1/jobs/{job_id}", get(job_handler::<P, S>))
        .route("/health", get(health_handler))
        .with_state(app_state)
}

#[cfg(test)]
mod integration_tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;
    use crate::persistence::WorkLogEntry;
    use crate::test_utils::{
        MockProtocol, MockServices, TestEngine, notification, sample_order, test_engine,
    };
    use crate::types::JobPhase;

    fn test_app(secret: Option<&[u8]>) -> (AppState<MockProtocol, MockServices>, Arc<TestEngine>) {
        let engine = Arc::new(test_engine());
        let state = AppState::new(Arc::clone(&engine), secret.map(<[u8]>::to_vec));
        (state, engine)
    }

    fn post_notification(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/notifications")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(signature::SIGNATURE_HEADER, signature);
        }
        builder.body(Body::from(body)).unwrap()
    }

    fn requested_body() -> Vec<u8> {
        serde_json::to_vec(&notification("1", JobPhase::Requested, "111", &["crypto"])).unwrap()
    }

    /// Waits for the spawned handler to post its payment request.
    async fn wait_for_payment_request(engine: &TestEngine) {
        for _ in 0..100 {
            if engine.protocol().count("request_payment") > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("notification was never handled");
    }

    // ─── Health endpoint tests ───

    #[tokio::test]
    async fn health_returns_200() {
        let (state, _engine) = test_app(None);
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = build_router(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    // ─── Notification endpoint tests ───

    #[tokio::test]
    async fn notification_is_accepted_and_dispatched() {
        let (state, engine) = test_app(None);

        let response = build_router(state)
            .oneshot(post_notification(requested_body(), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        wait_for_payment_request(&engine).await;
        assert_eq!(engine.protocol().count("accept"), 1);
    }

    #[tokio::test]
    async fn malformed_notification_returns_400() {
        let (state, engine) = test_app(None);

        let response = build_router(state)
            .oneshot(post_notification(b"{\"phase\": 2}".to_vec(), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(engine.protocol().calls().is_empty());
    }

    #[tokio::test]
    async fn signed_notification_is_accepted() {
        let secret = b"bridge-secret";
        let (state, engine) = test_app(Some(secret));
        let body = requested_body();
        let header = signature::sign(&body, secret);

        let response = build_router(state)
            .oneshot(post_notification(body, Some(header)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        wait_for_payment_request(&engine).await;
    }

    #[tokio::test]
    async fn bad_signature_returns_401() {
        let (state, engine) = test_app(Some(b"bridge-secret"));
        let body = requested_body();
        let header = signature::sign(&body, b"wrong-secret");

        let response = build_router(state)
            .oneshot(post_notification(body, Some(header)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.protocol().calls().is_empty());
    }

    #[tokio::test]
    async fn missing_signature_returns_400_when_secret_set() {
        let (state, _engine) = test_app(Some(b"bridge-secret"));

        let response = build_router(state)
            .oneshot(post_notification(requested_body(), None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    // ─── Jobs endpoint tests ───

    #[tokio::test]
    async fn jobs_lists_work_log_entries() {
        let (state, engine) = test_app(None);
        engine
            .context()
            .worklog
            .accept(&sample_order("7", "777", &["crypto"]));

        let request = Request::builder()
            .uri("/api/v1/jobs")
            .body(Body::empty())
            .unwrap();
        let response = build_router(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let entries: Vec<WorkLogEntry> = serde_json::from_slice(&body).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].job_id.as_str(), "7");
    }

    #[tokio::test]
    async fn job_returns_single_entry() {
        let (state, engine) = test_app(None);
        engine
            .context()
            .worklog
            .accept(&sample_order("7", "777", &["crypto"]));

        let request = Request::builder()
            .uri("/api/v1/jobs/7")
            .body(Body::empty())
            .unwrap();
        let response = build_router(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let entry: WorkLogEntry = serde_json::from_slice(&body).unwrap();
        assert_eq!(entry.item.as_str(), "777");
    }

    #[tokio::test]
    async fn unknown_job_returns_404() {
        let (state, _engine) = test_app(None);

        let request = Request::builder()
            .uri("/api/v1/jobs/nope")
            .body(Body::empty())
            .unwrap();
        let response = build_router(state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
