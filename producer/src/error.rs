//! Producer error types

use thiserror::Error;

/// Result type for producer operations
pub type ProducerResult<T> = Result<T, ProducerError>;

/// Producer error types
#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid credential {name}: {reason}")]
    InvalidCredential { name: String, reason: String },

    #[error("Unknown credential: {name}")]
    UnknownCredential { name: String },

    #[error("No rate limit token available after {waited_ms}ms")]
    AcquireTimeout { waited_ms: u64 },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}
