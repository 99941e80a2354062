//! Router tests driven through `tower::ServiceExt::oneshot`

use std::sync::Arc;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use orchestrator::services::MemoryCacheBackend;
use orchestrator::{BatchService, ReuseCache};
use producer::{SimulatedProvider, WorkerPool};
use shared::{BatchId, BatchStatus, CredentialConfig};
use webserver::WebServer;

fn server() -> (WebServer, Router) {
    let credentials = vec![
        CredentialConfig::custom("sim-1", "simulated-key-1", 5, 5.0, 2).with_cost(0.04),
        CredentialConfig::custom("sim-2", "simulated-key-2", 5, 5.0, 2).with_cost(0.04),
    ];
    let pool = WorkerPool::new(credentials, Arc::new(SimulatedProvider::instant())).unwrap();
    let service = BatchService::new(pool, ReuseCache::new(Arc::new(MemoryCacheBackend::new())));
    let server = WebServer::new(service);
    let router = server.build_router();
    (server, router)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn batch_body(count: usize) -> Value {
    let sources: Vec<Value> = (0..count)
        .map(|n| json!({ "identity": format!("sku-{n}"), "source_ref": format!("blob://{n}") }))
        .collect();
    json!({ "sources": sources, "config": { "variant_count": 2 } })
}

#[tokio::test]
async fn test_health_and_masked_credentials() {
    let (_server, router) = server();

    let (status, body) = send(&router, get("/api/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&router, get("/api/credentials")).await;
    assert_eq!(status, StatusCode::OK);
    let credentials = body.as_array().unwrap();
    assert_eq!(credentials.len(), 2);
    assert_eq!(credentials[0]["masked_key"], "simula...");
    assert!(!body.to_string().contains("simulated-key-1"));
}

#[tokio::test]
async fn test_submit_then_fetch_manifest() {
    let (server, router) = server();

    let (status, body) = send(&router, post_json("/api/batches", batch_body(4))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let batch_id: BatchId = body["batch_id"].as_str().unwrap().parse().unwrap();

    server.state().service.wait(batch_id).await.unwrap();

    let (status, body) = send(&router, get(&format!("/api/batches/{batch_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["manifest_ready"], true);
    assert_eq!(body["snapshot"]["succeeded"], 4);

    let (status, manifest) = send(&router, get(&format!("/api/batches/{batch_id}/manifest"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(manifest["declared_items"], 4);
    assert_eq!(manifest["items"][0]["result_refs"].as_array().unwrap().len(), 2);

    let (status, list) = send(&router, get("/api/batches")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (_, cache) = send(&router, get("/api/cache")).await;
    assert_eq!(cache["misses"], 4);

    let (status, costs) = send(&router, get("/api/costs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(costs["batches"], 1);
    assert_eq!(costs["total"]["images"], 8);
    assert!((costs["total"]["cost"].as_f64().unwrap() - 0.32).abs() < 1e-9);
    assert_eq!(costs["monthly"].as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn test_invalid_submissions_are_bad_requests() {
    let (_server, router) = server();

    let (status, body) = send(
        &router,
        post_json("/api/batches", json!({ "sources": [{ "identity": "", "source_ref": "blob://1" }] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("empty identity"));

    let mut unknown_credential = batch_body(1);
    unknown_credential["config"]["credentials"] = json!(["key-99"]);
    let (status, _) = send(&router, post_json("/api/batches", unknown_credential)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut no_credentials = batch_body(1);
    no_credentials["config"]["credentials"] = json!([]);
    let (status, body) = send(&router, post_json("/api/batches", no_credentials)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("credentials"));

    let mut zero_attempts = batch_body(1);
    zero_attempts["config"]["retry"] = json!({ "max_attempts": 0 });
    let (status, _) = send(&router, post_json("/api/batches", zero_attempts)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_batch_is_not_found() {
    let (_server, router) = server();
    let id = BatchId::new();

    let (status, _) = send(&router, get(&format!("/api/batches/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&router, post_json(&format!("/api/batches/{id}/stop"), Value::Null)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&router, get(&format!("/api/batches/{id}/manifest"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stop_request_is_acknowledged_and_batch_ends() {
    let (server, router) = server();

    let (_, body) = send(&router, post_json("/api/batches", batch_body(50))).await;
    let batch_id: BatchId = body["batch_id"].as_str().unwrap().parse().unwrap();

    let (status, body) = send(&router, post_json(&format!("/api/batches/{batch_id}/stop"), Value::Null)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["stop_requested"], true);

    let manifest = server.state().service.wait(batch_id).await.unwrap();
    assert_eq!(manifest.items.len(), 50);
    assert!(matches!(manifest.status, BatchStatus::Stopped | BatchStatus::Completed));
}
