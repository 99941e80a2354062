//! Orchestrator-specific error types

use thiserror::Error;
use producer::ProducerError;
use shared::{BatchId, SharedError};

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {field}: {message}")]
    ConfigurationError { field: String, message: String },

    #[error("No generation credentials available: {message}")]
    NoCredentials { message: String },

    #[error("Invalid batch request: {reason}")]
    InvalidBatch { reason: String },

    #[error("Batch not found: {batch_id}")]
    BatchNotFound { batch_id: BatchId },

    #[error("Manifest for batch {batch_id} is not ready")]
    ManifestNotReady { batch_id: BatchId },

    #[error("Reuse cache backend failed: {message}")]
    CacheError { message: String },

    #[error("Shared component error: {0}")]
    SharedError(#[from] SharedError),

    #[error("Producer error: {0}")]
    ProducerError(#[from] ProducerError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl OrchestratorError {
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_batch(reason: impl Into<String>) -> Self {
        Self::InvalidBatch { reason: reason.into() }
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
