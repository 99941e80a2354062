//! Generation worker: one credential slot plus the provider it calls

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use shared::{GenerationFailure, ProcessId, process_debug, process_warn};

use crate::core::slot::{CredentialSlot, SlotPermit};
use crate::error::ProducerError;
use crate::traits::GenerationProvider;
use crate::types::{WorkOrder, WorkReport};

pub struct GenerationWorker {
    slot: CredentialSlot,
    provider: Arc<dyn GenerationProvider>,
}

impl GenerationWorker {
    pub fn new(slot: CredentialSlot, provider: Arc<dyn GenerationProvider>) -> Self {
        Self { slot, provider }
    }

    pub fn name(&self) -> &str {
        self.slot.name()
    }

    pub fn slot(&self) -> &CredentialSlot {
        &self.slot
    }

    /// Claim a unit of this worker's concurrency ceiling without waiting
    pub fn try_reserve(&self) -> Option<SlotPermit> {
        self.slot.try_reserve()
    }

    /// Process one item under a previously reserved permit.
    ///
    /// Cancellation is observed before and during the token wait and again
    /// before the provider call, never during it.
    pub async fn process(&self, permit: SlotPermit, order: &WorkOrder, cancel: &watch::Receiver<bool>) -> WorkReport {
        let report = self.run(order, cancel).await;
        drop(permit);
        report
    }

    async fn run(&self, order: &WorkOrder, cancel: &watch::Receiver<bool>) -> WorkReport {
        let process_id = ProcessId::current();
        let identity = &order.request.identity;

        if *cancel.borrow() {
            return self.report(Err(GenerationFailure::Cancelled), Duration::ZERO, false);
        }

        let deadline = Instant::now() + order.acquire_timeout;
        let mut stop = cancel.clone();
        let stop_requested = async move {
            // A dropped sender can never request a stop
            if stop.wait_for(|stop| *stop).await.is_err() {
                std::future::pending::<()>().await;
            }
        };
        let acquired = tokio::select! {
            acquired = self.slot.limiter().acquire(deadline) => acquired,
            _ = stop_requested => {
                return self.report(Err(GenerationFailure::Cancelled), Duration::ZERO, false);
            }
        };
        let token_wait = match acquired {
            Ok(waited) => waited,
            Err(e) => {
                process_debug!(process_id, "⏳ {} gave up waiting for a token for {}: {}", self.name(), identity, e);
                let waited = match e {
                    ProducerError::AcquireTimeout { waited_ms } => Duration::from_millis(waited_ms),
                    _ => Duration::ZERO,
                };
                self.slot.record_wait(waited);
                return self.report(Err(GenerationFailure::TokenWaitExpired), waited, false);
            }
        };
        self.slot.record_wait(token_wait);

        if *cancel.borrow() {
            return self.report(Err(GenerationFailure::Cancelled), token_wait, false);
        }

        self.slot.record_request();
        let requested = order.request.variants;
        let outcome = match tokio::time::timeout(
            order.item_timeout,
            self.provider.generate(self.slot.config(), &order.request),
        )
        .await
        {
            Ok(Ok(references)) => Self::check_references(references, requested),
            Ok(Err(failure)) => Err(failure),
            Err(_) => Err(GenerationFailure::Timeout {
                after_ms: order.item_timeout.as_millis() as u64,
            }),
        };

        match &outcome {
            Ok(references) => {
                self.slot.record_success(references.len());
                process_debug!(process_id, "🖼️ {} generated {} image(s) for {}", self.name(), references.len(), identity);
            }
            Err(failure) => {
                self.slot.record_failure();
                process_warn!(process_id, "⚠️ {} failed on {}: {} ({})", self.name(), identity, failure, failure.class());
            }
        }

        self.report(outcome, token_wait, true)
    }

    /// One reference per requested variant; extras are dropped
    fn check_references(mut references: Vec<String>, requested: u32) -> Result<Vec<String>, GenerationFailure> {
        if references.is_empty() {
            return Err(GenerationFailure::ContentRejected("provider returned no images".to_string()));
        }
        if references.len() < requested as usize {
            return Err(GenerationFailure::IncompleteResponse {
                expected: requested,
                received: references.len() as u32,
            });
        }
        references.truncate(requested as usize);
        Ok(references)
    }

    fn report(&self, outcome: Result<Vec<String>, GenerationFailure>, token_wait: Duration, issued: bool) -> WorkReport {
        WorkReport {
            credential: self.name().to_string(),
            method: self.provider.method(),
            outcome,
            token_wait,
            issued,
        }
    }
}
