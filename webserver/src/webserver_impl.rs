//! Main webserver implementation
//!
//! Builds the axum router over the batch service and serves it until shutdown.

use std::future::Future;
use std::net::SocketAddr;
use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use orchestrator::BatchService;
use shared::{ProcessId, process_info};

use crate::error::{WebServerError, WebServerResult};
use crate::state::WebServerState;
use crate::web::handlers::{api, websocket};

#[derive(Clone)]
pub struct WebServer {
    state: WebServerState,
}

impl WebServer {
    pub fn new(service: BatchService) -> Self {
        Self {
            state: WebServerState::new(service),
        }
    }

    /// Build the Axum router with all routes
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/api/health", get(api::health))
            .route("/api/credentials", get(api::credentials))
            .route("/api/cache", get(api::cache_stats))
            .route("/api/costs", get(api::costs))
            .route("/api/batches", post(api::create_batch).get(api::list_batches))
            .route("/api/batches/:id", get(api::get_batch))
            .route("/api/batches/:id/stop", post(api::stop_batch))
            .route("/api/batches/:id/manifest", get(api::get_manifest))
            .route("/api/batches/:id/ws", get(websocket::progress_socket))
            // Allow CORS for browser dashboards on other origins
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves
    pub async fn run(&self, address: SocketAddr, shutdown: impl Future<Output = ()> + Send + 'static) -> WebServerResult<()> {
        let listener = tokio::net::TcpListener::bind(address)
            .await
            .map_err(|e| WebServerError::ServerStartupFailed {
                address: address.to_string(),
                message: e.to_string(),
            })?;

        process_info!(ProcessId::current(), "🌐 Web server listening on http://{}", address);

        axum::serve(listener, self.build_router())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    pub fn state(&self) -> &WebServerState {
        &self.state
    }
}
