//! Producer-specific data types

use std::time::Duration;
use serde::{Deserialize, Serialize};

use shared::{GenerationFailure, SourceIdentity, StyleParams, WorkItem};

/// Request forwarded to a generation provider for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub identity: SourceIdentity,
    pub source_ref: String,
    pub title: Option<String>,
    /// Number of new variants wanted
    pub variants: u32,
    pub style: StyleParams,
}

impl GenerationRequest {
    /// Build a request for the variants `item` still needs
    pub fn for_item(item: &WorkItem, variants: u32, style: &StyleParams) -> Self {
        Self {
            identity: item.identity.clone(),
            source_ref: item.source_ref.clone(),
            title: item.title.clone(),
            variants,
            style: style.clone(),
        }
    }
}

/// Everything a worker needs to process one item
#[derive(Debug, Clone)]
pub struct WorkOrder {
    pub request: GenerationRequest,
    /// Deadline for the provider call itself
    pub item_timeout: Duration,
    /// How long to wait for a rate limit token
    pub acquire_timeout: Duration,
}

/// What a worker hands back to the dispatcher
#[derive(Debug, Clone)]
pub struct WorkReport {
    pub credential: String,
    /// Provider method label, recorded in the reuse cache
    pub method: String,
    pub outcome: Result<Vec<String>, GenerationFailure>,
    pub token_wait: Duration,
    /// Whether a provider call was actually issued
    pub issued: bool,
}

impl WorkReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}
