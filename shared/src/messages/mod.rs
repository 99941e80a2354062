//! Message types crossing crate boundaries
//!
//! - `config`: credential, retry and batch configuration
//! - `batch`: batch submission and status query types
//! - `progress`: progress events and published snapshots
//! - `manifest`: the durable per-batch outcome report
//! - `costs`: running spend across batches

pub mod batch;
pub mod config;
pub mod costs;
pub mod manifest;
pub mod progress;

pub use batch::{BatchRequest, BatchStatusView, CredentialView, SourceDescriptor};
pub use config::{BatchConfig, CredentialConfig, CredentialTier, DEFAULT_COST_PER_IMAGE, RetryPolicy, StyleParams};
pub use costs::{CostSummary, UsageTotals};
pub use manifest::{CredentialUsage, ItemOutcome, Manifest};
pub use progress::{ProgressEvent, ProgressSnapshot};
