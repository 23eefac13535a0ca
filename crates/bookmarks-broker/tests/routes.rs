//! HTTP surface tests driven straight through the `axum` `Router` via
//! `tower::ServiceExt::oneshot`, exercising real route handlers without
//! binding a socket.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bookmarks_broker::{router, AppState, Applicator, Broker};
use bookmarks_core::{InMemoryOperationLog, OperationLog, SseConfig};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> axum::Router {
    let broker = Arc::new(Broker::new(SseConfig::default()));
    let log: Arc<dyn OperationLog> = Arc::new(InMemoryOperationLog::new());
    let applicator = Arc::new(Applicator::new(broker.clone(), log));
    router(AppState { broker, applicator })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn ping_responds_ok_with_no_body() {
    let response = app()
        .oneshot(Request::builder().method("HEAD").uri("/api/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn connections_reports_zero_before_anyone_subscribes() {
    let response = app()
        .oneshot(Request::builder().uri("/api/connections").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["connections"], 0);
}

#[tokio::test]
async fn sync_operations_creates_a_folder_and_returns_a_mapping() {
    let app = app();
    let request_body = json!({
        "clientId": "test-client",
        "operations": [{
            "id": "temp_1",
            "ts": "2026-01-01T00:00:00Z",
            "namespace": "default",
            "op": {
                "type": "create_folder",
                "id": "temp_1",
                "parent_id": "root",
                "title": "Dev",
                "is_open": null,
                "placement": null
            },
            "status": "pending",
            "retry_count": 0
        }]
    });

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/sync/default/operations")
                .header("content-type", "application/json")
                .body(Body::from(request_body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["applied"][0]["status"], "success");
    assert!(body["mappings"]["temp_1"].is_string());
}

#[tokio::test]
async fn tree_node_returns_root_with_no_children() {
    let response = app()
        .oneshot(Request::builder().uri("/api/default/tree/node/root").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["rootId"], "root");
    assert_eq!(body["nodes"].as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn namespaces_lists_only_materialized_namespaces() {
    let app = app();
    // Touching a namespace's tree (via tree_node) is enough to
    // materialize it without requiring an applied operation.
    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/default/tree/node/root").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(Request::builder().uri("/api/namespaces").body(Body::empty()).unwrap()).await.unwrap();
    let body = body_json(response).await;
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["namespace"], "default");
}
