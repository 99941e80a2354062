//! WebServer-specific error types

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;

use orchestrator::OrchestratorError;
use producer::ProducerError;
use shared::{ProcessId, process_error};

#[derive(Error, Debug)]
pub enum WebServerError {
    #[error("HTTP server startup failed on {address}: {message}")]
    ServerStartupFailed { address: String, message: String },

    #[error("Invalid request format: {details}")]
    InvalidRequest { details: String },

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl WebServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebServerError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            WebServerError::Orchestrator(error) => match error {
                OrchestratorError::BatchNotFound { .. } => StatusCode::NOT_FOUND,
                OrchestratorError::ManifestNotReady { .. } => StatusCode::CONFLICT,
                OrchestratorError::InvalidBatch { .. }
                | OrchestratorError::ConfigurationError { .. }
                | OrchestratorError::SharedError(_)
                | OrchestratorError::ProducerError(
                    ProducerError::UnknownCredential { .. } | ProducerError::ConfigError { .. },
                ) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            process_error!(ProcessId::current(), "❌ Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type WebServerResult<T> = Result<T, WebServerError>;
