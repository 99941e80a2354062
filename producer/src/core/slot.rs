//! Credential slot: one credential, its limiter and its concurrency ceiling

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use shared::{CredentialConfig, CredentialUsage};

use crate::core::rate_limiter::RateLimiter;
use crate::error::{ProducerError, ProducerResult};

/// Proof that the holder may issue one request under a slot.
///
/// The slot's in-flight count drops when the permit is dropped, and anyone
/// waiting on the slot's release signal is woken.
#[derive(Debug)]
pub struct SlotPermit {
    permit: Option<OwnedSemaphorePermit>,
    released: Arc<Notify>,
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.released.notify_waiters();
    }
}

#[derive(Debug, Default)]
struct SlotStats {
    requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    token_wait_ms: AtomicU64,
    images: AtomicU64,
}

#[derive(Debug)]
pub struct CredentialSlot {
    config: CredentialConfig,
    limiter: RateLimiter,
    concurrency: Arc<Semaphore>,
    released: Arc<Notify>,
    stats: SlotStats,
}

impl CredentialSlot {
    pub fn new(config: CredentialConfig) -> ProducerResult<Self> {
        config.validate().map_err(|e| ProducerError::InvalidCredential {
            name: config.name.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            limiter: RateLimiter::for_credential(&config),
            concurrency: Arc::new(Semaphore::new(config.max_concurrent as usize)),
            released: Arc::new(Notify::new()),
            config,
            stats: SlotStats::default(),
        })
    }

    /// Share a release signal with other slots, so one waiter can watch a whole pool
    pub fn with_release_signal(mut self, released: Arc<Notify>) -> Self {
        self.released = released;
        self
    }

    pub fn release_signal(&self) -> Arc<Notify> {
        self.released.clone()
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Claim one unit of the concurrency ceiling without waiting
    pub fn try_reserve(&self) -> Option<SlotPermit> {
        self.concurrency
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| SlotPermit {
                permit: Some(permit),
                released: self.released.clone(),
            })
    }

    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent as usize - self.concurrency.available_permits()
    }

    pub(crate) fn record_request(&self) {
        self.stats.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_success(&self, images: usize) {
        self.stats.successes.fetch_add(1, Ordering::Relaxed);
        self.stats.images.fetch_add(images as u64, Ordering::Relaxed);
    }

    /// Billed cost of `images` generated under this credential
    pub fn cost_of(&self, images: usize) -> f64 {
        images as f64 * self.config.cost_per_image
    }

    pub(crate) fn record_failure(&self) {
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_wait(&self, waited: Duration) {
        self.stats
            .token_wait_ms
            .fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
    }

    /// Cumulative usage since the slot was created
    pub fn usage(&self) -> CredentialUsage {
        let images = self.stats.images.load(Ordering::Relaxed);
        CredentialUsage {
            name: self.config.name.clone(),
            tier: self.config.tier.to_string(),
            requests: self.stats.requests.load(Ordering::Relaxed),
            successes: self.stats.successes.load(Ordering::Relaxed),
            failures: self.stats.failures.load(Ordering::Relaxed),
            token_wait_ms: self.stats.token_wait_ms.load(Ordering::Relaxed),
            images,
            cost: self.cost_of(images as usize),
        }
    }
}
