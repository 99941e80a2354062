//! Core types used throughout the enhancement system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::errors::{FailureClass, SharedError};
use crate::messages::{BatchConfig, SourceDescriptor};

/// Global process ID singleton - set once at startup
static PROCESS_ID: OnceLock<ProcessId> = OnceLock::new();

/// Process identifier used to tag log events
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessId {
    /// Batch orchestrator (CLI or embedded service)
    Orchestrator,
    /// HTTP/WebSocket front end
    WebServer,
}

impl ProcessId {
    /// Initialize the global process ID for orchestrator
    pub fn init_orchestrator() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Orchestrator)
    }

    /// Initialize the global process ID for webserver
    pub fn init_webserver() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::WebServer)
    }

    /// Get the global process ID, defaulting to orchestrator when embedded
    pub fn current() -> &'static ProcessId {
        PROCESS_ID.get_or_init(|| ProcessId::Orchestrator)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessId::Orchestrator => write!(f, "orchestrator"),
            ProcessId::WebServer => write!(f, "webserver"),
        }
    }
}

/// Unique identifier for one orchestration run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BatchId {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| SharedError::InvalidUuid { input: s.to_string() })
    }
}

/// Stable content/source identity of a work item; the reuse cache key
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceIdentity(String);

impl SourceIdentity {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceIdentity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Per-item lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Queued,
    Dispatched,
    Succeeded,
    Reused,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Succeeded | ItemStatus::Reused | ItemStatus::Failed | ItemStatus::Skipped
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ItemStatus::Queued => "queued",
            ItemStatus::Dispatched => "dispatched",
            ItemStatus::Succeeded => "succeeded",
            ItemStatus::Reused => "reused",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        };
        f.write_str(label)
    }
}

/// Batch lifecycle status: `pending -> running -> {completed | stopped | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Stopped | BatchStatus::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Completed => "completed",
            BatchStatus::Stopped => "stopped",
            BatchStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One source image/product to enhance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub identity: SourceIdentity,
    pub source_ref: String,
    pub title: Option<String>,
    pub variant_count: u32,
    pub status: ItemStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub error_class: Option<FailureClass>,
    /// References taken from the reuse cache
    pub reused_refs: Vec<String>,
    /// References produced by this batch
    pub generated_refs: Vec<String>,
    /// Credential that produced `generated_refs`
    pub credential: Option<String>,
    /// Billed cost of `generated_refs`
    #[serde(default)]
    pub cost: f64,
}

impl WorkItem {
    pub fn from_descriptor(descriptor: SourceDescriptor, default_variants: u32) -> Self {
        Self {
            identity: descriptor.identity,
            source_ref: descriptor.source_ref,
            title: descriptor.title,
            variant_count: descriptor.variant_count.unwrap_or(default_variants).max(1),
            status: ItemStatus::Queued,
            attempts: 0,
            last_error: None,
            error_class: None,
            reused_refs: Vec::new(),
            generated_refs: Vec::new(),
            credential: None,
            cost: 0.0,
        }
    }

    /// All result references for this item, reused first
    pub fn result_refs(&self) -> Vec<String> {
        self.reused_refs.iter().chain(self.generated_refs.iter()).cloned().collect()
    }
}

/// One orchestration run over an ordered list of work items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub id: BatchId,
    pub items: Vec<WorkItem>,
    pub created_at: DateTime<Utc>,
    pub status: BatchStatus,
    pub cancel_requested: bool,
    /// Set once an item was skipped to stay within the budget
    #[serde(default)]
    pub budget_exhausted: bool,
    pub config: BatchConfig,
}

impl Batch {
    pub fn new(sources: Vec<SourceDescriptor>, config: BatchConfig) -> Self {
        let items = sources
            .into_iter()
            .map(|source| WorkItem::from_descriptor(source, config.variant_count))
            .collect();

        Self {
            id: BatchId::new(),
            items,
            created_at: Utc::now(),
            status: BatchStatus::Pending,
            cancel_requested: false,
            budget_exhausted: false,
            config,
        }
    }

    pub fn declared_items(&self) -> usize {
        self.items.len()
    }

    pub fn terminal_items(&self) -> usize {
        self.items.iter().filter(|item| item.status.is_terminal()).count()
    }

    pub fn count(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|item| item.status == status).count()
    }
}

/// One generated result reference stored in the reuse cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    pub reference: String,
    pub method: String,
    pub created_at: DateTime<Utc>,
}

/// Durable record mapping a source identity to its generated results.
///
/// Entries are append-only: later generations add results, never replace them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub identity: SourceIdentity,
    pub results: Vec<CachedResult>,
    pub created_at: DateTime<Utc>,
    /// Set once the record has been fully written
    pub complete: bool,
}

impl CacheEntry {
    pub fn new(identity: SourceIdentity) -> Self {
        Self {
            identity,
            results: Vec::new(),
            created_at: Utc::now(),
            complete: true,
        }
    }

    pub fn references(&self) -> Vec<String> {
        self.results.iter().map(|result| result.reference.clone()).collect()
    }

    /// Append references not already present; returns how many were added
    pub fn append(&mut self, references: &[String], method: &str, at: DateTime<Utc>) -> usize {
        let mut added = 0;
        for reference in references {
            if !self.results.iter().any(|existing| &existing.reference == reference) {
                self.results.push(CachedResult {
                    reference: reference.clone(),
                    method: method.to_string(),
                    created_at: at,
                });
                added += 1;
            }
        }
        added
    }
}
