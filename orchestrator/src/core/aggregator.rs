//! Result aggregation into the batch manifest

use std::time::Duration;
use chrono::{DateTime, Utc};

use shared::{Batch, CredentialUsage, ItemOutcome, ItemStatus, Manifest, WorkItem};

fn outcome(item: &WorkItem) -> ItemOutcome {
    ItemOutcome {
        identity: item.identity.clone(),
        source_ref: item.source_ref.clone(),
        title: item.title.clone(),
        status: item.status,
        attempts: item.attempts,
        requested_variants: item.variant_count,
        result_refs: item.result_refs(),
        reused_refs: item.reused_refs.clone(),
        generated_refs: item.generated_refs.clone(),
        credential: item.credential.clone(),
        cost: item.cost,
        error: item.last_error.clone(),
        error_class: item.error_class,
    }
}

/// Build the manifest for a batch whose items are all terminal.
///
/// Pure function of the batch state; items keep their submission order.
pub fn finalize(
    batch: &Batch,
    credential_usage: Vec<CredentialUsage>,
    total_elapsed: Duration,
    finished_at: DateTime<Utc>,
) -> Manifest {
    Manifest {
        batch_id: batch.id,
        status: batch.status,
        declared_items: batch.declared_items(),
        succeeded: batch.count(ItemStatus::Succeeded),
        reused: batch.count(ItemStatus::Reused),
        failed: batch.count(ItemStatus::Failed),
        skipped: batch.count(ItemStatus::Skipped),
        items: batch.items.iter().map(outcome).collect(),
        total_elapsed_ms: total_elapsed.as_millis() as u64,
        created_at: batch.created_at,
        finished_at,
        credential_usage,
        generated_images: batch.items.iter().map(|item| item.generated_refs.len() as u64).sum(),
        total_cost: batch.items.iter().map(|item| item.cost).sum(),
        budget: batch.config.budget,
        budget_exhausted: batch.budget_exhausted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{BatchConfig, BatchStatus, FailureClass, SourceDescriptor, SourceIdentity};

    #[test]
    fn test_manifest_counts_and_outcomes() {
        let sources = vec![
            SourceDescriptor::new("sku-1", "blob://1"),
            SourceDescriptor::new("sku-2", "blob://2").with_variants(2),
            SourceDescriptor::new("sku-3", "blob://3"),
        ];
        let mut batch = Batch::new(sources, BatchConfig::default());

        batch.items[0].status = ItemStatus::Succeeded;
        batch.items[0].attempts = 1;
        batch.items[0].generated_refs = vec!["gen-1.png".to_string()];
        batch.items[0].credential = Some("key-1".to_string());
        batch.items[0].cost = 0.04;

        batch.items[1].status = ItemStatus::Succeeded;
        batch.items[1].reused_refs = vec!["old.png".to_string()];
        batch.items[1].generated_refs = vec!["new.png".to_string()];
        batch.items[1].cost = 0.04;

        batch.items[2].status = ItemStatus::Failed;
        batch.items[2].attempts = 3;
        batch.items[2].last_error = Some("provider server error (503): busy".to_string());
        batch.items[2].error_class = Some(FailureClass::RetryableExhausted);
        batch.status = BatchStatus::Completed;

        let manifest = finalize(&batch, Vec::new(), Duration::from_millis(4_500), Utc::now());

        assert_eq!(manifest.declared_items, 3);
        assert_eq!(manifest.succeeded + manifest.reused + manifest.failed + manifest.skipped, 3);
        assert_eq!(manifest.failed, 1);
        assert_eq!(manifest.total_elapsed_ms, 4_500);
        assert_eq!(manifest.generated_images, 2);
        assert!((manifest.total_cost - 0.08).abs() < 1e-9);
        assert_eq!(manifest.budget, None);
        assert!(!manifest.budget_exhausted);

        let partial = manifest.outcome(&SourceIdentity::from("sku-2")).unwrap();
        assert_eq!(partial.result_refs, vec!["old.png", "new.png"]);
        assert_eq!(partial.requested_variants, 2);

        let failed = &manifest.items[2];
        assert_eq!(failed.error_class, Some(FailureClass::RetryableExhausted));

        let by_identity = manifest.results_by_identity();
        assert_eq!(by_identity.len(), 2);
        assert!(!by_identity.contains_key(&SourceIdentity::from("sku-3")));
    }
}
