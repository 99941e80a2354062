//! Spend of finished batches, kept for the life of the service

use std::sync::Arc;
use tokio::sync::RwLock;

use shared::{CostSummary, Manifest, ProcessId, process_info};

/// Shared running totals. Cloning shares state.
#[derive(Clone, Default)]
pub struct CostLedger {
    summary: Arc<RwLock<CostSummary>>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, manifest: &Manifest) {
        let mut summary = self.summary.write().await;
        summary.record(manifest.generated_images, manifest.total_cost, manifest.finished_at);
        let today = summary.day(manifest.finished_at);
        process_info!(
            ProcessId::current(),
            "💰 Batch {} cost {:.4} for {} image(s); {:.4} spent today",
            manifest.batch_id,
            manifest.total_cost,
            manifest.generated_images,
            today.cost
        );
    }

    pub async fn summary(&self) -> CostSummary {
        self.summary.read().await.clone()
    }
}
