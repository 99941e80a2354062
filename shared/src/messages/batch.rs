//! Batch submission surface messages

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::{BatchConfig, CredentialTier, CredentialUsage, ProgressSnapshot};
use crate::types::{BatchId, BatchStatus, SourceIdentity};

/// Source descriptor for one work item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDescriptor {
    pub identity: SourceIdentity,
    /// URL or blob handle of the source image
    pub source_ref: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Overrides the batch-wide variant count
    #[serde(default)]
    pub variant_count: Option<u32>,
}

impl SourceDescriptor {
    pub fn new(identity: impl Into<String>, source_ref: impl Into<String>) -> Self {
        Self {
            identity: SourceIdentity::new(identity),
            source_ref: source_ref.into(),
            title: None,
            variant_count: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_variants(mut self, variant_count: u32) -> Self {
        self.variant_count = Some(variant_count);
        self
    }
}

/// Request to start a new batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub sources: Vec<SourceDescriptor>,
    #[serde(default)]
    pub config: BatchConfig,
}

/// Answer to a status query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatusView {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub stop_requested: bool,
    pub snapshot: ProgressSnapshot,
    pub manifest_ready: bool,
}

/// Listing entry for one credential; the API key is always masked
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CredentialView {
    pub name: String,
    pub tier: CredentialTier,
    pub masked_key: String,
    pub capacity: u32,
    pub refill_per_second: f64,
    pub max_concurrent: u32,
    pub cost_per_image: f64,
    /// Tokens currently available
    pub available_tokens: u32,
    pub in_flight: usize,
    /// Lifetime usage across every batch
    pub usage: CredentialUsage,
}
