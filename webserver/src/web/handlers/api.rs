//! REST API handlers
//!
//! Batch submission, status queries, stop requests, manifests and spend over JSON.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use chrono::Utc;
use serde_json::{Value, json};

use orchestrator::CacheStats;
use shared::{BatchId, BatchRequest, BatchStatusView, CostSummary, CredentialView, Manifest, ProcessId, process_info};

use crate::error::WebServerResult;
use crate::state::WebServerState;

/// Health check endpoint
pub async fn health(State(state): State<WebServerState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "started_at": state.started_at(),
        "uptime_seconds": state.uptime_seconds(),
        "batches": state.service.list().await.len(),
    }))
}

/// Credentials with masked keys and lifetime usage
pub async fn credentials(State(state): State<WebServerState>) -> Json<Vec<CredentialView>> {
    Json(state.service.credentials())
}

pub async fn cache_stats(State(state): State<WebServerState>) -> Json<CacheStats> {
    Json(state.service.cache_stats())
}

/// Spend of finished batches, by day and month
pub async fn costs(State(state): State<WebServerState>) -> Json<CostSummary> {
    Json(state.service.costs().await)
}

/// Start a batch; answers as soon as it is accepted
pub async fn create_batch(
    State(state): State<WebServerState>,
    Json(request): Json<BatchRequest>,
) -> WebServerResult<(StatusCode, Json<Value>)> {
    let items = request.sources.len();
    let batch_id = state.service.submit(request).await?;
    process_info!(ProcessId::current(), "✅ Batch {} submitted over HTTP ({} items)", batch_id, items);

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "batch_id": batch_id,
            "items": items,
        })),
    ))
}

pub async fn list_batches(State(state): State<WebServerState>) -> Json<Vec<BatchStatusView>> {
    Json(state.service.list().await)
}

pub async fn get_batch(
    State(state): State<WebServerState>,
    Path(batch_id): Path<BatchId>,
) -> WebServerResult<Json<BatchStatusView>> {
    Ok(Json(state.service.status(batch_id).await?))
}

pub async fn stop_batch(
    State(state): State<WebServerState>,
    Path(batch_id): Path<BatchId>,
) -> WebServerResult<(StatusCode, Json<Value>)> {
    state.service.stop(batch_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "batch_id": batch_id,
            "stop_requested": true,
        })),
    ))
}

/// 409 until the batch has finished
pub async fn get_manifest(
    State(state): State<WebServerState>,
    Path(batch_id): Path<BatchId>,
) -> WebServerResult<Json<Manifest>> {
    let manifest = state.service.manifest(batch_id).await?;
    Ok(Json(manifest.as_ref().clone()))
}
