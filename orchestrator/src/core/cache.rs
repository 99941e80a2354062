//! Reuse cache: at most one successful generation per source identity
//!
//! The check-then-reserve sequence is atomic per identity across every handle
//! on the same backend, in this process or another. A caller reserves the
//! identity in the backend before consulting the entries, so a second caller
//! always finds either the reservation or the finished entry. Reservations are
//! released only after the backend append has completed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use shared::{CacheEntry, ProcessId, SourceIdentity, process_debug, process_warn};
use crate::error::OrchestratorResult;
use crate::traits::{CacheBackend, CacheLookup};

/// How often a waiter re-checks a reservation held through another handle
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Outcome of waiting on another caller's reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The holder stored its results
    Resolved,
    /// The holder gave up without storing anything
    Abandoned,
    TimedOut,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses that reused some cached variants
    pub partial_hits: u64,
    pub waits: u64,
    pub reservations: u64,
    pub inconsistencies: u64,
    /// Hits as a percentage of hits plus misses
    pub reuse_rate: f64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    partial_hits: AtomicU64,
    waits: AtomicU64,
    reservations: AtomicU64,
    inconsistencies: AtomicU64,
}

struct CacheInner {
    backend: Arc<dyn CacheBackend>,
    /// Every owner name this handle reserves under starts with it
    owner_prefix: String,
    next_token: AtomicU64,
    /// Reservations this handle currently holds
    held: AtomicUsize,
    /// Wakes local waiters when a reservation is released
    released: Notify,
    poll_interval: Duration,
    counters: Counters,
}

/// Result of a claim attempt
pub enum Claim {
    /// Enough cached variants exist; the references to reuse
    Hit(Vec<String>),
    /// The caller must generate `missing()` variants and complete the reservation
    Reserved(Reservation),
    /// Another caller is generating this identity
    InFlight(InFlightWait),
}

/// Handle to the shared reuse cache. Cloning is cheap and shares state.
#[derive(Clone)]
pub struct ReuseCache {
    inner: Arc<CacheInner>,
}

impl ReuseCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self::with_poll_interval(backend, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(backend: Arc<dyn CacheBackend>, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                backend,
                owner_prefix: uuid::Uuid::new_v4().to_string(),
                next_token: AtomicU64::new(1),
                held: AtomicUsize::new(0),
                released: Notify::new(),
                poll_interval,
                counters: Counters::default(),
            }),
        }
    }

    /// Complete cached references for `identity`, empty on a miss.
    ///
    /// Incomplete records are counted, logged and read as misses.
    pub async fn lookup(&self, identity: &SourceIdentity) -> OrchestratorResult<Vec<String>> {
        Ok(self.read(identity).await?.0)
    }

    /// References plus whether an incomplete record stood in for them
    async fn read(&self, identity: &SourceIdentity) -> OrchestratorResult<(Vec<String>, bool)> {
        match self.inner.backend.load(identity).await? {
            CacheLookup::Found(entry) => Ok((entry.references(), false)),
            CacheLookup::Missing => Ok((Vec::new(), false)),
            CacheLookup::Incomplete => {
                self.inner.counters.inconsistencies.fetch_add(1, Ordering::Relaxed);
                process_warn!(
                    ProcessId::current(),
                    "⚠️ Incomplete cache record for {}; treating as a miss",
                    identity
                );
                Ok((Vec::new(), true))
            }
        }
    }

    /// Start-of-batch check: the references to reuse if `wanted` are already cached
    pub async fn check(&self, identity: &SourceIdentity, wanted: u32) -> OrchestratorResult<Option<Vec<String>>> {
        let mut references = self.lookup(identity).await?;
        if references.len() >= wanted as usize {
            references.truncate(wanted as usize);
            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            Ok(Some(references))
        } else {
            Ok(None)
        }
    }

    /// Atomically check the cache and reserve `identity` for generation.
    ///
    /// With `may_wait` false an identity that is already in flight is still
    /// handed back as a detached reservation holding nothing in the backend,
    /// so the caller generates independently.
    pub async fn try_claim(&self, identity: &SourceIdentity, wanted: u32, may_wait: bool) -> OrchestratorResult<Claim> {
        let owner = format!(
            "{}-{}",
            self.inner.owner_prefix,
            self.inner.next_token.fetch_add(1, Ordering::Relaxed)
        );
        let reserved = self.inner.backend.try_reserve(identity, &owner).await?;
        if reserved {
            self.inner.held.fetch_add(1, Ordering::Relaxed);
        }

        let mut reservation = Reservation {
            cache: self.clone(),
            identity: identity.clone(),
            owner: reserved.then_some(owner),
            existing: Vec::new(),
            missing: wanted,
            inconsistent: false,
        };

        // On error the reservation drops here and is released
        let (mut existing, inconsistent) = self.read(identity).await?;

        if existing.len() >= wanted as usize {
            existing.truncate(wanted as usize);
            self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
            reservation.release().await;
            return Ok(Claim::Hit(existing));
        }

        if !reserved && may_wait {
            self.inner.counters.waits.fetch_add(1, Ordering::Relaxed);
            return Ok(Claim::InFlight(InFlightWait {
                cache: self.clone(),
                identity: identity.clone(),
            }));
        }

        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
        if !existing.is_empty() {
            self.inner.counters.partial_hits.fetch_add(1, Ordering::Relaxed);
        }
        if reserved {
            self.inner.counters.reservations.fetch_add(1, Ordering::Relaxed);
        } else {
            process_debug!(ProcessId::current(), "🔁 Generating {} without a reservation after wait timeout", identity);
        }

        reservation.missing = wanted - existing.len() as u32;
        reservation.existing = existing;
        reservation.inconsistent = inconsistent;
        Ok(Claim::Reserved(reservation))
    }

    /// Record references produced outside a reservation.
    ///
    /// Appends to the identity's entry; existing references are never replaced.
    pub async fn insert(&self, identity: &SourceIdentity, references: &[String], method: &str) -> OrchestratorResult<CacheEntry> {
        self.inner.backend.append(identity, references, method).await
    }

    /// Identities this handle currently holds reserved
    pub fn in_flight(&self) -> usize {
        self.inner.held.load(Ordering::Relaxed)
    }

    pub async fn entries(&self) -> OrchestratorResult<Vec<CacheEntry>> {
        self.inner.backend.scan().await
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        let hits = counters.hits.load(Ordering::Relaxed);
        let misses = counters.misses.load(Ordering::Relaxed);
        let reuse_rate = if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64 * 100.0
        };

        CacheStats {
            hits,
            misses,
            partial_hits: counters.partial_hits.load(Ordering::Relaxed),
            waits: counters.waits.load(Ordering::Relaxed),
            reservations: counters.reservations.load(Ordering::Relaxed),
            inconsistencies: counters.inconsistencies.load(Ordering::Relaxed),
            reuse_rate,
        }
    }

    async fn release_owner(&self, identity: &SourceIdentity, owner: &str) {
        if let Err(e) = self.inner.backend.release(identity, owner).await {
            process_warn!(
                ProcessId::current(),
                "⚠️ Could not release reservation for {}: {}; it lapses with its lease",
                identity,
                e
            );
        }
        self.inner.released.notify_waiters();
    }
}

/// Exclusive right to generate one identity.
///
/// Dropping it without `complete` abandons the reservation and wakes waiters,
/// which then claim the identity themselves.
pub struct Reservation {
    cache: ReuseCache,
    identity: SourceIdentity,
    /// `None` once released, or for a detached reservation
    owner: Option<String>,
    existing: Vec<String>,
    missing: u32,
    inconsistent: bool,
}

impl Reservation {
    pub fn take_existing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.existing)
    }

    /// Variants still to generate
    pub fn missing(&self) -> u32 {
        self.missing
    }

    pub fn is_detached(&self) -> bool {
        self.owner.is_none()
    }

    /// The backend held an incomplete record that was read as a miss
    pub fn is_inconsistent(&self) -> bool {
        self.inconsistent
    }

    fn take_owner(&mut self) -> Option<String> {
        let owner = self.owner.take();
        if owner.is_some() {
            self.cache.inner.held.fetch_sub(1, Ordering::Relaxed);
        }
        owner
    }

    async fn release(&mut self) {
        if let Some(owner) = self.take_owner() {
            self.cache.release_owner(&self.identity, &owner).await;
        }
    }

    /// Append generated references, then release the reservation to waiters
    pub async fn complete(mut self, references: &[String], method: &str) -> OrchestratorResult<CacheEntry> {
        let result = self.cache.inner.backend.append(&self.identity, references, method).await;
        self.release().await;
        result
    }

    /// Give up the reservation without storing anything
    pub async fn abandon(mut self) {
        self.release().await;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let Some(owner) = self.take_owner() else {
            return;
        };
        let cache = self.cache.clone();
        let identity = self.identity.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { cache.release_owner(&identity, &owner).await });
            }
            Err(_) => process_warn!(
                ProcessId::current(),
                "⚠️ No runtime to release reservation for {}; it lapses with its lease",
                identity
            ),
        }
    }
}

/// Watch on a reservation held by another caller
pub struct InFlightWait {
    cache: ReuseCache,
    identity: SourceIdentity,
}

impl InFlightWait {
    /// Wait until the holder releases, checking the backend on every local
    /// release and at the poll interval for holders behind other handles
    pub async fn wait(self, timeout: Duration) -> WaitOutcome {
        let inner = &self.cache.inner;
        let deadline = Instant::now() + timeout;

        loop {
            let notified = inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match inner.backend.is_reserved(&self.identity).await {
                Ok(true) => {}
                Ok(false) => {
                    return match inner.backend.load(&self.identity).await {
                        Ok(CacheLookup::Found(entry)) if !entry.results.is_empty() => WaitOutcome::Resolved,
                        _ => WaitOutcome::Abandoned,
                    };
                }
                Err(e) => {
                    process_warn!(ProcessId::current(), "⚠️ Reservation check for {} failed: {}", self.identity, e);
                    return WaitOutcome::Abandoned;
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(inner.poll_interval) => {}
                _ = tokio::time::sleep_until(deadline) => return WaitOutcome::TimedOut,
            }
        }
    }
}
