//! API surface tests, driven through the router against the in-memory
//! store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use taskqueue::storage::MemoryStore;
use taskqueue::web::{self, AppState};

fn test_app() -> Router {
    let store = Arc::new(MemoryStore::new());
    web::router(AppState::new(store, None))
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

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn create_task_returns_created_with_queued_status() {
    let app = test_app();

    let response = app
        .oneshot(post_json(
            "/api/tasks",
            json!({"name": "welcome", "type": "Send_Email", "payload": {"to": "a@b.c"}}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["id"], 1);
    assert_eq!(body["status"], "queued");
}

#[tokio::test]
async fn create_task_rejects_empty_type() {
    let app = test_app();

    let response = app
        .oneshot(post_json("/api/tasks", json!({"name": "x", "type": "  "})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "task type is required");
}

#[tokio::test]
async fn get_task_returns_the_stored_view() {
    let app = test_app();

    app.clone()
        .oneshot(post_json(
            "/api/tasks",
            json!({"name": "t", "type": "NOOP", "priority": 9, "max_retries": 1}),
        ))
        .await
        .unwrap();

    let response = app.oneshot(get("/api/tasks/1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["type"], "noop");
    assert_eq!(body["priority"], 9);
    assert_eq!(body["max_retries"], 1);
    assert_eq!(body["retry_count"], 0);
    assert_eq!(body["payload"], json!({}));
    // Scheduling internals stay private.
    assert!(body.get("next_run_at").is_none());
    assert!(body.get("lock_expires_at").is_none());
}

#[tokio::test]
async fn unknown_task_is_a_404() {
    let app = test_app();

    let response = app.clone().oneshot(get("/api/tasks/99")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(get("/api/tasks/99/history")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn history_lists_events_in_order() {
    let app = test_app();

    app.clone()
        .oneshot(post_json("/api/tasks", json!({"name": "t", "type": "noop"})))
        .await
        .unwrap();

    let response = app.oneshot(get("/api/tasks/1/history")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let history = body["history"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["event_type"], "task_queued");
    assert_eq!(history[0]["status"], "queued");
}

#[tokio::test]
async fn stats_report_queue_counters() {
    let app = test_app();

    for i in 0..3 {
        app.clone()
            .oneshot(post_json(
                "/api/tasks",
                json!({"name": format!("t{i}"), "type": "noop"}),
            ))
            .await
            .unwrap();
    }

    let response = app.oneshot(get("/api/stats")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["total_tasks"], 3);
    assert_eq!(body["queued_tasks"], 3);
    assert_eq!(body["succeeded_tasks"], 0);
    assert_eq!(body["tasks_with_retries"], 0);
}

#[tokio::test]
async fn health_endpoints_respond() {
    let app = test_app();

    let response = app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.clone().oneshot(get("/liveness")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // No pool behind the embedded store, so readiness is unconditional.
    let response = app.oneshot(get("/readiness")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ready");
}
