//! Shared types for the catalog image enhancement system
//!
//! Contains the batch data model, the generation failure taxonomy and the
//! wire types (progress snapshots, manifests, batch requests) that cross
//! crate boundaries between the producer, orchestrator and webserver.

pub mod errors;
pub mod logging;
pub mod messages;
pub mod types;

pub use errors::*;
pub use types::*;

pub use messages::{
    // Configuration
    BatchConfig, CredentialConfig, CredentialTier, DEFAULT_COST_PER_IMAGE, RetryPolicy, StyleParams,

    // Submission surface
    BatchRequest, BatchStatusView, CredentialView, SourceDescriptor,

    // Progress stream
    ProgressEvent, ProgressSnapshot,

    // Final report
    CredentialUsage, ItemOutcome, Manifest,

    // Spend
    CostSummary, UsageTotals,
};
