//! Final per-batch outcome report
//!
//! The manifest is the durable record of a batch. Catalog collaborators use
//! `results_by_identity` to attach images to their entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::FailureClass;
use crate::types::{BatchId, BatchStatus, ItemStatus, SourceIdentity};

/// Outcome of one work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub identity: SourceIdentity,
    pub source_ref: String,
    pub title: Option<String>,
    pub status: ItemStatus,
    pub attempts: u32,
    pub requested_variants: u32,
    pub result_refs: Vec<String>,
    pub reused_refs: Vec<String>,
    pub generated_refs: Vec<String>,
    pub credential: Option<String>,
    /// Billed cost of `generated_refs`
    pub cost: f64,
    pub error: Option<String>,
    pub error_class: Option<FailureClass>,
}

/// Usage of one credential slot over the batch's lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialUsage {
    pub name: String,
    pub tier: String,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub token_wait_ms: u64,
    /// Images returned by successful requests
    #[serde(default)]
    pub images: u64,
    #[serde(default)]
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub declared_items: usize,
    pub succeeded: usize,
    pub reused: usize,
    pub failed: usize,
    pub skipped: usize,
    pub items: Vec<ItemOutcome>,
    pub total_elapsed_ms: u64,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub credential_usage: Vec<CredentialUsage>,
    /// Images generated by this batch; reused ones are free
    pub generated_images: u64,
    pub total_cost: f64,
    pub budget: Option<f64>,
    /// Set when items were skipped to stay within `budget`
    pub budget_exhausted: bool,
}

impl Manifest {
    pub fn outcome(&self, identity: &SourceIdentity) -> Option<&ItemOutcome> {
        self.items.iter().find(|item| &item.identity == identity)
    }

    /// Source identity to result references, for items that produced any
    pub fn results_by_identity(&self) -> BTreeMap<SourceIdentity, Vec<String>> {
        self.items
            .iter()
            .filter(|item| !item.result_refs.is_empty())
            .map(|item| (item.identity.clone(), item.result_refs.clone()))
            .collect()
    }

    /// Share of processed items served from the reuse cache, in percent
    pub fn reuse_rate(&self) -> f64 {
        let processed = self.succeeded + self.reused;
        if processed == 0 {
            0.0
        } else {
            self.reused as f64 / processed as f64 * 100.0
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
