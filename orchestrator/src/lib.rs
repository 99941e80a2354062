//! Orchestrator library for batch image enhancement
//!
//! Runs batches of work items against a shared pool of rate-limited generation
//! workers. Items already generated are taken from the reuse cache, the rest
//! are dispatched with bounded retries, progress is published to any number
//! of observers and every batch ends in a manifest.

pub mod batch_service;
pub mod bootstrap;
pub mod core;
pub mod error;
pub mod services;
pub mod traits;

// Re-export commonly used types
pub use crate::core::{
    CacheStats, CostLedger, DispatchOutcome, Dispatcher, ProgressReporter, ProgressStream, ReuseCache, finalize,
};
pub use batch_service::BatchService;
pub use bootstrap::{ProviderMode, ServiceOptions, assemble, build_service};
pub use error::{OrchestratorError, OrchestratorResult};
pub use traits::{CacheBackend, CacheLookup, CredentialSource};
