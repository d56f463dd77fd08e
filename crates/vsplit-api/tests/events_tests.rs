//! Tests for the notification intake endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tokio::sync::Notify;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vsplit_api::{create_router, ApiConfig, AppState, SourceRunner};
use vsplit_models::KeyLayout;
use vsplit_pipeline::{EventClassifier, PipelineError, PipelineResult, RunReport};
use vsplit_storage::MemoryStore;

/// Records each source it is asked to run, optionally holding runs open.
#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
}

impl RecordingRunner {
    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            gate: Some(gate),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceRunner for RecordingRunner {
    async fn run(&self, source_key: &str) -> PipelineResult<RunReport> {
        self.calls.lock().unwrap().push(source_key.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Err(PipelineError::config("runs are not executed in intake tests"))
    }
}

fn test_config() -> ApiConfig {
    ApiConfig {
        handshake_timeout: Duration::from_secs(2),
        handshake_max_retries: 1,
        ..ApiConfig::default()
    }
}

fn app(config: ApiConfig, store: MemoryStore, runner: Arc<RecordingRunner>) -> axum::Router {
    let classifier = EventClassifier::new(KeyLayout::default(), None);
    let state = AppState::from_parts(config, classifier, Arc::new(store), runner).unwrap();
    create_router(state, None)
}

fn post_event(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/events")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn created(key: &str) -> Value {
    json!({"Records": [{
        "eventName": "ObjectCreated:Put",
        "s3": {"bucket": {"name": "media"}, "object": {"key": key}}
    }]})
}

async fn wait_for_calls(runner: &RecordingRunner, expected: usize) {
    for _ in 0..100 {
        if runner.calls().len() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_handshake_confirms_subscription() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/confirm"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let runner = Arc::new(RecordingRunner::default());
    let app = app(test_config(), MemoryStore::new(), runner.clone());
    let event = json!({
        "Type": "SubscriptionConfirmation",
        "SubscribeURL": format!("{}/confirm", server.uri()),
    });

    let (status, body) = send(app, post_event(&event)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "confirmed");
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_handshake_callback_failure_is_bad_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/confirm"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let runner = Arc::new(RecordingRunner::default());
    let app = app(test_config(), MemoryStore::new(), runner);
    let event = json!({
        "Type": "SubscriptionConfirmation",
        "SubscribeURL": format!("{}/confirm", server.uri()),
    });

    let (status, body) = send(app, post_event(&event)).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["detail"].as_str().unwrap().contains("confirmation"));
}

#[tokio::test]
async fn test_source_notification_starts_one_run() {
    let runner = Arc::new(RecordingRunner::default());
    let app = app(test_config(), MemoryStore::new(), runner.clone());

    let (status, body) = send(app, post_event(&created("uploads/clip.mp4"))).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["sources"], json!(["uploads/clip.mp4"]));

    wait_for_calls(&runner, 1).await;
    assert_eq!(runner.calls(), vec!["uploads/clip.mp4".to_string()]);
}

#[tokio::test]
async fn test_wrapped_notification_is_unwrapped() {
    let runner = Arc::new(RecordingRunner::default());
    let app = app(test_config(), MemoryStore::new(), runner.clone());
    let event = json!({
        "Type": "Notification",
        "Message": created("talk.mov").to_string(),
    });

    let (status, body) = send(app, post_event(&event)).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["sources"], json!(["talk.mov"]));
    wait_for_calls(&runner, 1).await;
    assert_eq!(runner.calls(), vec!["talk.mov".to_string()]);
}

#[tokio::test]
async fn test_pipeline_owned_keys_are_ignored() {
    let runner = Arc::new(RecordingRunner::default());
    let app = app(test_config(), MemoryStore::new(), runner.clone());
    let event = json!({"Records": [
        {"eventName": "ObjectCreated:Put", "s3": {"object": {"key": "clip/part0.mp4"}}},
        {"eventName": "ObjectCreated:Put", "s3": {"object": {"key": "clip/part0_cmpl.mp4"}}},
        {"eventName": "ObjectCreated:Put", "s3": {"object": {"key": "clip_merged.mp4"}}},
    ]});

    let (status, body) = send(app, post_event(&event)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert_eq!(body["skipped"].as_array().unwrap().len(), 3);
    assert!(body.get("sources").is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_unrecognized_event_is_ignored() {
    let runner = Arc::new(RecordingRunner::default());
    let app = app(test_config(), MemoryStore::new(), runner.clone());

    let (status, body) = send(app, post_event(&json!({"hello": "world"}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert!(body["reason"].is_string());
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_malformed_event_is_bad_request() {
    let runner = Arc::new(RecordingRunner::default());
    let app = app(test_config(), MemoryStore::new(), runner.clone());
    let request = Request::builder()
        .method("POST")
        .uri("/events")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_archive_stores_decoded_event() {
    let store = MemoryStore::new();
    let runner = Arc::new(RecordingRunner::default());
    let config = ApiConfig {
        archive_events: true,
        ..test_config()
    };
    let app = app(config, store.clone(), runner);

    let (status, _) = send(app, post_event(&created("clip.mp4"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let keys = store.keys().await;
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("events/"));
    assert!(keys[0].ends_with(".json"));
    assert_eq!(
        store.content_type(&keys[0]).await.as_deref(),
        Some("application/json")
    );
}

#[tokio::test]
async fn test_archive_disabled_writes_nothing() {
    let store = MemoryStore::new();
    let runner = Arc::new(RecordingRunner::default());
    let app = app(test_config(), store.clone(), runner);

    let (status, _) = send(app, post_event(&created("clip.mp4"))).await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_single_flight_skips_duplicate_delivery() {
    let gate = Arc::new(Notify::new());
    let runner = Arc::new(RecordingRunner::gated(gate.clone()));
    let config = ApiConfig {
        single_flight: true,
        ..test_config()
    };
    let app = app(config, MemoryStore::new(), runner.clone());

    let (first, _) = send(app.clone(), post_event(&created("clip.mp4"))).await;
    let (second, body) = send(app, post_event(&created("clip.mp4"))).await;

    assert_eq!(first, StatusCode::ACCEPTED);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(body["status"], "ignored");
    assert_eq!(body["skipped"][0]["key"], "clip.mp4");
    assert_eq!(body["skipped"][0]["reason"], "in_flight");

    wait_for_calls(&runner, 1).await;
    gate.notify_waiters();
    assert_eq!(runner.calls().len(), 1);
}

#[tokio::test]
async fn test_duplicate_delivery_runs_twice_without_single_flight() {
    let runner = Arc::new(RecordingRunner::default());
    let app = app(test_config(), MemoryStore::new(), runner.clone());

    let (first, _) = send(app.clone(), post_event(&created("clip.mp4"))).await;
    let (second, _) = send(app, post_event(&created("clip.mp4"))).await;

    assert_eq!(first, StatusCode::ACCEPTED);
    assert_eq!(second, StatusCode::ACCEPTED);
    wait_for_calls(&runner, 2).await;
    assert_eq!(runner.calls().len(), 2);
}

#[tokio::test]
async fn test_health() {
    let runner = Arc::new(RecordingRunner::default());
    let app = app(test_config(), MemoryStore::new(), runner);
    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();

    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}
