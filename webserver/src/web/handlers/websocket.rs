//! WebSocket progress stream
//!
//! Sends one JSON `ProgressSnapshot` per text frame, starting with the current
//! snapshot, and closes after the completion snapshot. A client that goes away
//! simply drops its subscription; the batch is unaffected.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};

use orchestrator::ProgressStream;
use shared::{BatchId, ProcessId, process_debug, process_warn};

use crate::error::WebServerResult;
use crate::state::WebServerState;

/// Subscribe before upgrading so unknown batches get a plain 404
pub async fn progress_socket(
    ws: WebSocketUpgrade,
    State(state): State<WebServerState>,
    Path(batch_id): Path<BatchId>,
) -> WebServerResult<Response> {
    let stream = state.service.subscribe(batch_id).await?;
    Ok(ws.on_upgrade(move |socket| forward_progress(socket, batch_id, stream)))
}

async fn forward_progress(socket: WebSocket, batch_id: BatchId, mut stream: ProgressStream) {
    let process_id = ProcessId::current();
    process_debug!(process_id, "🔗 Progress subscriber connected to batch {}", batch_id);

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            snapshot = stream.next() => {
                let Some(snapshot) = snapshot else { break };
                let json = match serde_json::to_string(&snapshot) {
                    Ok(json) => json,
                    Err(e) => {
                        process_warn!(process_id, "⚠️ Failed to serialize snapshot for {}: {}", batch_id, e);
                        continue;
                    }
                };
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Observers have nothing to say; pings are answered by axum
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    process_debug!(process_id, "🔌 Progress subscriber for batch {} disconnected", batch_id);
}
