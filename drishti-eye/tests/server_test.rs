//! HTTP control surface tests

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::wait_until_async;
use drishti_eye::answerer::OfflineAnswerer;
use drishti_eye::camera::SyntheticBackend;
use drishti_eye::config::AssistantConfig;
use drishti_eye::detection::DemoDetector;
use drishti_eye::{server, VisionAssistant};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn demo_assistant(captures: &std::path::Path) -> Arc<VisionAssistant> {
    let mut config = AssistantConfig {
        demo: true,
        captures_dir: captures.to_path_buf(),
        ..AssistantConfig::default()
    };
    config.capture.resolution = (320, 240);
    config.capture.broadcast_fps = 30;
    Arc::new(VisionAssistant::new(
        config,
        Arc::new(SyntheticBackend),
        Some(Arc::new(DemoDetector)),
        Arc::new(OfflineAnswerer),
    ))
}

async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_queries_before_capture() {
    let dir = tempfile::tempdir().unwrap();
    let app = server::router(demo_assistant(dir.path()));

    let (status, json) = call(&app, "GET", "/api/camera/info", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["available"], false);

    let (status, json) = call(&app, "POST", "/api/ask", Some(json!({"question": "Hello?"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "No frame available");

    let (status, json) = call(&app, "POST", "/api/ask", Some(json!({"question": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);

    let (_, json) = call(&app, "GET", "/api/detection/summary", None).await;
    assert_eq!(json["summary"], "No objects detected");
    assert_eq!(json["object_count"], 0);
}

#[tokio::test]
async fn test_capture_session_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let assistant = demo_assistant(dir.path());
    let app = server::router(assistant.clone());

    let (status, json) = call(&app, "POST", "/api/camera/start", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);

    let (status, json) = call(&app, "POST", "/api/camera/start", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["success"], false);

    assert!(wait_until_async(Duration::from_secs(5), || !assistant.perception().is_empty()).await);

    let (_, json) = call(&app, "GET", "/api/camera/info", None).await;
    assert_eq!(json["data"]["available"], true);
    assert_eq!(json["data"]["width"], 320);

    let (_, json) = call(&app, "GET", "/api/detection/summary", None).await;
    assert_eq!(json["object_count"], 3);
    assert_eq!(json["objects"].as_array().unwrap().len(), 3);

    let (status, json) = call(&app, "POST", "/api/ask", Some(json!({"question": "What is here?"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["question"], "What is here?");
    assert!(json["answer"].as_str().unwrap().contains("car"));

    let (status, json) = call(&app, "POST", "/api/analyze", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["safety"]["level"], "low");

    let (status, json) = call(&app, "POST", "/api/capture", None).await;
    assert_eq!(status, StatusCode::OK);
    let filename = json["filename"].as_str().unwrap();
    assert!(dir.path().join(filename).is_file());
    assert!(json["image"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));

    let (_, json) = call(&app, "GET", "/api/stream/stats", None).await;
    assert_eq!(json["data"]["active_loops"], 1);

    let (status, _) = call(&app, "POST", "/api/camera/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = call(&app, "GET", "/api/camera/info", None).await;
    assert_eq!(json["data"]["available"], false);
    let (_, json) = call(&app, "GET", "/api/detection/summary", None).await;
    assert_eq!(json["object_count"], 0);
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let app = server::router(demo_assistant(dir.path()));
    let (status, json) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
}
