//! Progress events and snapshots

use serde::{Deserialize, Serialize};

use crate::types::{BatchId, BatchStatus, ItemStatus, SourceIdentity};

/// Event published by the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProgressEvent {
    BatchStarted {
        total: usize,
    },
    ItemTransition {
        identity: SourceIdentity,
        from: ItemStatus,
        to: ItemStatus,
    },
    BatchFinished {
        status: BatchStatus,
    },
}

/// Read-only view of batch progress, recomputed from running counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub total: usize,
    pub queued: usize,
    pub dispatched: usize,
    pub succeeded: usize,
    pub reused: usize,
    pub failed: usize,
    pub skipped: usize,
    pub percent_complete: f64,
    pub current_item: Option<SourceIdentity>,
    pub elapsed_ms: u64,
    pub eta_seconds: Option<f64>,
    /// Set on the final snapshot of a batch
    pub completed: bool,
    /// Monotonic per-batch counter, lets observers detect gaps
    pub sequence: u64,
}

impl ProgressSnapshot {
    pub fn empty(batch_id: BatchId, total: usize) -> Self {
        Self {
            batch_id,
            status: BatchStatus::Pending,
            total,
            queued: total,
            dispatched: 0,
            succeeded: 0,
            reused: 0,
            failed: 0,
            skipped: 0,
            percent_complete: 0.0,
            current_item: None,
            elapsed_ms: 0,
            eta_seconds: None,
            completed: false,
            sequence: 0,
        }
    }

    pub fn terminal(&self) -> usize {
        self.succeeded + self.reused + self.failed + self.skipped
    }
}
