//! Shared error types and the generation failure taxonomy

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Serialization failed: {message}")]
    SerializationError { message: String },

    #[error("Deserialization failed: {message}")]
    DeserializationError { message: String },

    #[error("Invalid UUID: {input}")]
    InvalidUuid { input: String },

    #[error("Invalid configuration: {field} = {value}")]
    InvalidConfig { field: String, value: String },
}

pub type SharedResult<T> = Result<T, SharedError>;

/// Classified failure of a single generation call.
///
/// Workers only classify; retry policy is decided by the dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GenerationFailure {
    #[error("network error: {0}")]
    NetworkError(String),

    #[error("generation timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("provider rate limit exceeded")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("provider server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("provider returned {received} of {expected} requested images")]
    IncompleteResponse { expected: u32, received: u32 },

    /// The credential's limiter did not grant a token before the deadline.
    /// No request was issued.
    #[error("no rate limit token available before deadline")]
    TokenWaitExpired,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("credential quota exhausted for billing period")]
    QuotaExhausted,

    #[error("content rejected by provider: {0}")]
    ContentRejected(String),

    /// Batch cancellation was observed before the request was issued.
    #[error("cancelled before dispatch")]
    Cancelled,
}

impl GenerationFailure {
    /// Whether the dispatcher may requeue the item
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationFailure::NetworkError(_)
                | GenerationFailure::Timeout { .. }
                | GenerationFailure::RateLimited { .. }
                | GenerationFailure::ServerError { .. }
                | GenerationFailure::IncompleteResponse { .. }
                | GenerationFailure::TokenWaitExpired
        )
    }

    /// Provider-suggested delay before the next attempt, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GenerationFailure::RateLimited { retry_after_ms: Some(ms) } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// Classification recorded in the manifest for this failure
    pub fn class(&self) -> FailureClass {
        if matches!(self, GenerationFailure::Cancelled) {
            FailureClass::Cancelled
        } else if self.is_retryable() {
            FailureClass::RetryableTransient
        } else {
            FailureClass::Terminal
        }
    }

    /// Map an HTTP status code from a provider to a failure
    pub fn from_status(status: u16, body: &str, retry_after_ms: Option<u64>) -> Self {
        let message: String = body.chars().take(200).collect();
        match status {
            400 | 404 | 413 | 415 | 422 => GenerationFailure::InvalidInput(message),
            401 => GenerationFailure::AuthenticationFailed,
            402 => GenerationFailure::QuotaExhausted,
            403 if body.to_lowercase().contains("quota") => GenerationFailure::QuotaExhausted,
            403 => GenerationFailure::AuthenticationFailed,
            408 => GenerationFailure::Timeout { after_ms: 0 },
            429 => GenerationFailure::RateLimited { retry_after_ms },
            500..=599 => GenerationFailure::ServerError { status, message },
            _ => GenerationFailure::InvalidInput(format!("unexpected status {status}: {message}")),
        }
    }
}

/// Error classification string attached to failed or skipped items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureClass {
    RetryableTransient,
    RetryableExhausted,
    Terminal,
    /// Regenerated because the cached record was never fully written
    CacheInconsistency,
    Cancelled,
    /// Skipped because generating it would exceed the batch budget
    BudgetExhausted,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::RetryableTransient => write!(f, "retryable-transient"),
            FailureClass::RetryableExhausted => write!(f, "retryable-exhausted"),
            FailureClass::Terminal => write!(f, "terminal"),
            FailureClass::CacheInconsistency => write!(f, "cache-inconsistency"),
            FailureClass::Cancelled => write!(f, "cancelled"),
            FailureClass::BudgetExhausted => write!(f, "budget-exhausted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(GenerationFailure::from_status(429, "", Some(500)).is_retryable());
        assert!(GenerationFailure::from_status(503, "unavailable", None).is_retryable());
        assert!(!GenerationFailure::from_status(401, "", None).is_retryable());
        assert!(!GenerationFailure::from_status(422, "bad image", None).is_retryable());
        assert_eq!(
            GenerationFailure::from_status(403, "Quota exceeded for project", None),
            GenerationFailure::QuotaExhausted
        );
        assert_eq!(GenerationFailure::from_status(403, "forbidden", None), GenerationFailure::AuthenticationFailed);
    }

    #[test]
    fn test_retry_after_only_for_rate_limits() {
        let limited = GenerationFailure::RateLimited { retry_after_ms: Some(1500) };
        assert_eq!(limited.retry_after(), Some(Duration::from_millis(1500)));
        assert_eq!(GenerationFailure::NetworkError("reset".into()).retry_after(), None);
    }

    #[test]
    fn test_token_wait_is_retryable_and_cancel_is_not() {
        assert!(GenerationFailure::TokenWaitExpired.is_retryable());
        assert!(!GenerationFailure::Cancelled.is_retryable());
        assert_eq!(GenerationFailure::Cancelled.class(), FailureClass::Cancelled);
    }

    #[test]
    fn test_failure_class_serializes_kebab_case() {
        let json = serde_json::to_string(&FailureClass::RetryableExhausted).unwrap();
        assert_eq!(json, "\"retryable-exhausted\"");
        assert_eq!(FailureClass::Terminal.to_string(), "terminal");
        assert_eq!(
            serde_json::to_string(&FailureClass::CacheInconsistency).unwrap(),
            format!("\"{}\"", FailureClass::CacheInconsistency)
        );
        assert_eq!(FailureClass::BudgetExhausted.to_string(), "budget-exhausted");
    }
}
