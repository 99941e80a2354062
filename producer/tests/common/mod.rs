//! Shared helpers for producer integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::watch;

use producer::{CredentialSlot, GenerationProvider, GenerationRequest, GenerationWorker, WorkOrder};
use shared::{CredentialConfig, GenerationFailure, SourceIdentity, StyleParams};

pub fn order(identity: &str, variants: u32) -> WorkOrder {
    WorkOrder {
        request: GenerationRequest {
            identity: SourceIdentity::from(identity),
            source_ref: format!("blob://{identity}"),
            title: None,
            variants,
            style: StyleParams::default(),
        },
        item_timeout: Duration::from_secs(5),
        acquire_timeout: Duration::from_secs(5),
    }
}

pub fn worker(config: CredentialConfig, provider: Arc<dyn GenerationProvider>) -> GenerationWorker {
    GenerationWorker::new(CredentialSlot::new(config).unwrap(), provider)
}

pub fn not_cancelled() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    // Keep the value readable after the sender is gone
    drop(tx);
    rx
}

/// Provider that sleeps before answering; counts calls
pub struct SlowProvider {
    pub delay: Duration,
    pub calls: AtomicU32,
}

impl SlowProvider {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl GenerationProvider for SlowProvider {
    fn method(&self) -> String {
        "slow".to_string()
    }

    async fn generate(
        &self,
        _credential: &CredentialConfig,
        request: &GenerationRequest,
    ) -> Result<Vec<String>, GenerationFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok((0..request.variants).map(|n| format!("slow://{}/{n}", request.identity)).collect())
    }
}
