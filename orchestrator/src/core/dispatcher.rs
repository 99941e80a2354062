//! Dispatcher: drives one batch from `pending` to a terminal status
//!
//! The dispatcher owns the batch's items for the whole run. Workers receive a
//! copy of what they need and hand their report back over a channel, so item
//! state is only ever mutated here. Items that are already cached never reach
//! a worker. Everything else is assigned round-robin to workers with spare
//! concurrency, retried with capped exponential backoff while the failure is
//! retryable, and skipped when the batch is stopped. With a budget set, an
//! item is only dispatched when its estimated cost fits next to what has been
//! spent and what is still in flight.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use producer::{GenerationRequest, GenerationWorker, SlotPermit, WorkOrder, WorkReport, WorkerPool};
use shared::{
    Batch, BatchStatus, CredentialUsage, FailureClass, GenerationFailure, ItemStatus, ProcessId,
    ProgressEvent, process_debug, process_error, process_info, process_warn,
};

use crate::core::cache::{Claim, Reservation, ReuseCache, WaitOutcome};
use crate::core::progress::ProgressReporter;

enum Event {
    Finished { index: usize, report: WorkReport },
    RetryReady(usize),
    CacheSettled { index: usize, outcome: WaitOutcome },
}

/// Where a non-terminal item currently sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready,
    Backoff,
    CacheWait,
    InFlight,
    Done,
}

/// Everything the dispatcher hands back once every item is terminal
pub struct DispatchOutcome {
    pub batch: Batch,
    /// Per-credential usage by this batch, in pool order
    pub credential_usage: Vec<CredentialUsage>,
    pub elapsed: Duration,
}

pub struct Dispatcher {
    batch: Batch,
    pool: WorkerPool,
    cache: ReuseCache,
    reporter: ProgressReporter,
    stop: watch::Receiver<bool>,

    phases: Vec<Phase>,
    /// Whether the cache has been claimed for the item
    claimed: Vec<bool>,
    /// Variants still to generate per item
    missing: Vec<u32>,
    /// Cleared after a cache wait timed out
    may_wait: Vec<bool>,
    token_waits: Vec<u32>,
    reservations: HashMap<usize, Reservation>,
    /// Given up, waiting for their backend release
    abandoned: Vec<Reservation>,
    /// Claimed over an incomplete cache record
    regenerated: Vec<bool>,
    ready: VecDeque<usize>,
    in_flight: usize,
    terminal: usize,
    cursor: usize,
    stopping: bool,
    usage: HashMap<String, CredentialUsage>,
    /// Cost per image by credential name
    rates: HashMap<String, f64>,
    /// Estimated cost of each in-flight item
    estimates: Vec<f64>,
    spent: f64,
    committed: f64,
}

impl Dispatcher {
    pub fn new(
        batch: Batch,
        pool: WorkerPool,
        cache: ReuseCache,
        reporter: ProgressReporter,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let total = batch.items.len();
        let missing = batch.items.iter().map(|item| item.variant_count).collect();
        let usage = pool
            .workers()
            .iter()
            .map(|worker| {
                let config = worker.slot().config();
                (
                    config.name.clone(),
                    CredentialUsage {
                        name: config.name.clone(),
                        tier: config.tier.to_string(),
                        requests: 0,
                        successes: 0,
                        failures: 0,
                        token_wait_ms: 0,
                        images: 0,
                        cost: 0.0,
                    },
                )
            })
            .collect();
        let rates = pool
            .workers()
            .iter()
            .map(|worker| (worker.name().to_string(), worker.slot().config().cost_per_image))
            .collect();

        Self {
            batch,
            pool,
            cache,
            reporter,
            stop,
            phases: vec![Phase::Ready; total],
            claimed: vec![false; total],
            missing,
            may_wait: vec![true; total],
            token_waits: vec![0; total],
            reservations: HashMap::new(),
            abandoned: Vec::new(),
            regenerated: vec![false; total],
            ready: VecDeque::with_capacity(total),
            in_flight: 0,
            terminal: 0,
            cursor: 0,
            stopping: false,
            usage,
            rates,
            estimates: vec![0.0; total],
            spent: 0.0,
            committed: 0.0,
        }
    }

    pub async fn run(mut self) -> DispatchOutcome {
        let process_id = ProcessId::current();
        let started = Instant::now();
        let total = self.batch.items.len();
        let (events_tx, mut events) = mpsc::unbounded_channel();

        self.batch.status = BatchStatus::Running;
        self.reporter.publish(ProgressEvent::BatchStarted { total });
        process_info!(
            process_id,
            "🚀 Batch {} started: {} item(s) across {} credential(s)",
            self.batch.id,
            total,
            self.pool.len()
        );

        self.check_cache().await;

        let released = self.pool.release_signal();
        let mut stop_open = true;

        while self.terminal < total {
            self.release_abandoned().await;
            if !self.stopping && *self.stop.borrow() {
                self.begin_stop();
                continue;
            }

            // Registered before looking at permits so a release in between is not missed
            let permit_freed = released.notified();
            let blocked = self.fill(&events_tx).await;
            if self.terminal >= total {
                break;
            }

            tokio::select! {
                Some(event) = events.recv() => self.handle(event, &events_tx).await,
                _ = permit_freed, if blocked => {}
                changed = self.stop.changed(), if stop_open && !self.stopping => {
                    if changed.is_err() {
                        stop_open = false;
                    }
                }
            }
        }

        self.release_abandoned().await;
        let elapsed = started.elapsed();
        let productive = self.batch.count(ItemStatus::Succeeded) + self.batch.count(ItemStatus::Reused);
        let status = if self.stopping {
            BatchStatus::Stopped
        } else if total > 0 && productive == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
        self.batch.status = status;
        self.reporter.publish(ProgressEvent::BatchFinished { status });

        process_info!(
            process_id,
            "🏁 Batch {} {} in {:.1}s: {} succeeded, {} reused, {} failed, {} skipped",
            self.batch.id,
            status,
            elapsed.as_secs_f64(),
            self.batch.count(ItemStatus::Succeeded),
            self.batch.count(ItemStatus::Reused),
            self.batch.count(ItemStatus::Failed),
            self.batch.count(ItemStatus::Skipped)
        );

        let credential_usage = self
            .pool
            .workers()
            .iter()
            .filter_map(|worker| self.usage.remove(worker.name()))
            .collect();

        DispatchOutcome {
            batch: self.batch,
            credential_usage,
            elapsed,
        }
    }

    /// Start-of-batch pass: cached items become `reused` without touching a worker
    async fn check_cache(&mut self) {
        for index in 0..self.batch.items.len() {
            let item = &self.batch.items[index];
            match self.cache.check(&item.identity, item.variant_count).await {
                Ok(Some(references)) => self.finish_reused(index, references),
                Ok(None) => self.ready.push_back(index),
                Err(e) => {
                    process_warn!(ProcessId::current(), "⚠️ Cache check failed for {}: {}", item.identity, e);
                    self.ready.push_back(index);
                }
            }
        }
    }

    /// Dispatch ready items while capacity allows.
    ///
    /// Returns true when items are waiting only because every worker's
    /// concurrency is taken, possibly by other batches.
    async fn fill(&mut self, events: &mpsc::UnboundedSender<Event>) -> bool {
        while let Some(&index) = self.ready.front() {
            if let Some(cap) = self.batch.config.max_concurrency {
                if self.in_flight >= cap {
                    return false;
                }
            }
            let Some((worker, permit)) = self.next_worker() else {
                return true;
            };
            self.ready.pop_front();
            if !self.dispatch(index, worker, permit, events).await {
                // Over budget until in-flight spend settles
                return false;
            }
        }
        false
    }

    /// Round-robin over workers, skipping those without spare concurrency
    fn next_worker(&mut self) -> Option<(Arc<GenerationWorker>, SlotPermit)> {
        let workers = self.pool.workers();
        for offset in 0..workers.len() {
            let position = (self.cursor + offset) % workers.len();
            if let Some(permit) = workers[position].try_reserve() {
                self.cursor = position + 1;
                return Some((workers[position].clone(), permit));
            }
        }
        None
    }

    /// Claim the cache for an item and hand it to `worker`.
    ///
    /// Returns false when the item went back to the front of the queue because
    /// its estimated cost only fits once in-flight items report.
    async fn dispatch(
        &mut self,
        index: usize,
        worker: Arc<GenerationWorker>,
        permit: SlotPermit,
        events: &mpsc::UnboundedSender<Event>,
    ) -> bool {
        if !self.claimed[index] {
            let identity = self.batch.items[index].identity.clone();
            let wanted = self.batch.items[index].variant_count;

            match self.cache.try_claim(&identity, wanted, self.may_wait[index]).await {
                Ok(Claim::Hit(references)) => {
                    drop(permit);
                    self.finish_reused(index, references);
                    return true;
                }
                Ok(Claim::InFlight(wait)) => {
                    drop(permit);
                    self.phases[index] = Phase::CacheWait;
                    let timeout = self.batch.config.cache_wait_timeout();
                    let events = events.clone();
                    process_debug!(ProcessId::current(), "⏸️ {} is being generated elsewhere; waiting", identity);
                    tokio::spawn(async move {
                        let outcome = wait.wait(timeout).await;
                        let _ = events.send(Event::CacheSettled { index, outcome });
                    });
                    return true;
                }
                Ok(Claim::Reserved(mut reservation)) => {
                    self.missing[index] = reservation.missing();
                    self.regenerated[index] = reservation.is_inconsistent();
                    self.batch.items[index].reused_refs = reservation.take_existing();
                    self.reservations.insert(index, reservation);
                }
                Err(e) => {
                    process_warn!(
                        ProcessId::current(),
                        "⚠️ Reuse cache unavailable for {}: {}; generating without it",
                        identity,
                        e
                    );
                }
            }
            self.claimed[index] = true;
        }

        let estimate = self.missing[index] as f64 * self.rate(worker.name());
        if let Some(budget) = self.batch.config.budget {
            if self.spent + self.committed + estimate > budget + f64::EPSILON {
                drop(permit);
                if self.in_flight > 0 {
                    self.ready.push_front(index);
                    return false;
                }
                self.exhaust_budget(index, budget);
                return true;
            }
        }

        let config = &self.batch.config;
        let order = WorkOrder {
            request: GenerationRequest::for_item(&self.batch.items[index], self.missing[index], &config.style),
            item_timeout: config.item_timeout(),
            acquire_timeout: config.acquire_timeout(),
        };

        self.phases[index] = Phase::InFlight;
        self.in_flight += 1;
        self.estimates[index] = estimate;
        self.committed += estimate;
        self.transition(index, ItemStatus::Dispatched);

        let cancel = self.stop.clone();
        let events = events.clone();
        tokio::spawn(async move {
            let report = worker.process(permit, &order, &cancel).await;
            let _ = events.send(Event::Finished { index, report });
        });
        true
    }

    async fn handle(&mut self, event: Event, events: &mpsc::UnboundedSender<Event>) {
        match event {
            Event::Finished { index, report } => self.finished(index, report, events).await,
            Event::RetryReady(index) => {
                // Items skipped by a stop while backing off stay skipped
                if self.phases[index] == Phase::Backoff {
                    self.phases[index] = Phase::Ready;
                    self.ready.push_back(index);
                }
            }
            Event::CacheSettled { index, outcome } => {
                if self.phases[index] == Phase::CacheWait {
                    if outcome == WaitOutcome::TimedOut {
                        process_warn!(
                            ProcessId::current(),
                            "⚠️ Gave up waiting on in-flight generation of {}",
                            self.batch.items[index].identity
                        );
                        self.may_wait[index] = false;
                    }
                    self.phases[index] = Phase::Ready;
                    self.ready.push_back(index);
                }
            }
        }
    }

    async fn finished(&mut self, index: usize, report: WorkReport, events: &mpsc::UnboundedSender<Event>) {
        self.in_flight -= 1;
        self.committed = (self.committed - std::mem::take(&mut self.estimates[index])).max(0.0);
        self.record_usage(&report);
        if report.issued {
            self.batch.items[index].attempts += 1;
        }

        match report.outcome {
            Ok(references) => {
                if let Some(reservation) = self.reservations.remove(&index) {
                    if let Err(e) = reservation.complete(&references, &report.method).await {
                        process_warn!(
                            ProcessId::current(),
                            "⚠️ Could not store results for {} in the reuse cache: {}",
                            self.batch.items[index].identity,
                            e
                        );
                    }
                }
                let cost = references.len() as f64 * self.rate(&report.credential);
                self.spent += cost;
                let item = &mut self.batch.items[index];
                item.generated_refs = references;
                item.credential = Some(report.credential);
                item.cost += cost;
                item.last_error = None;
                // Succeeded, but only after an incomplete cache record was ignored
                item.error_class = self.regenerated[index].then_some(FailureClass::CacheInconsistency);
                self.transition(index, ItemStatus::Succeeded);
            }
            Err(failure) => {
                let item = &mut self.batch.items[index];
                item.last_error = Some(failure.to_string());
                item.credential = Some(report.credential);

                if failure == GenerationFailure::Cancelled {
                    self.skip(index);
                } else if !failure.is_retryable() {
                    self.fail(index, FailureClass::Terminal);
                } else if self.stopping {
                    self.skip(index);
                } else if self.retry_allowed(index, &failure) {
                    self.schedule_retry(index, &failure, events);
                } else {
                    self.fail(index, FailureClass::RetryableExhausted);
                }
            }
        }
    }

    /// Token-wait expiries never count as attempts, but get their own budget
    /// of `max_attempts` so a starved credential cannot requeue an item forever.
    fn retry_allowed(&mut self, index: usize, failure: &GenerationFailure) -> bool {
        let policy = &self.batch.config.retry;
        if *failure == GenerationFailure::TokenWaitExpired {
            self.token_waits[index] += 1;
            self.token_waits[index] < policy.max_attempts
        } else {
            policy.allows_another(self.batch.items[index].attempts)
        }
    }

    fn schedule_retry(&mut self, index: usize, failure: &GenerationFailure, events: &mpsc::UnboundedSender<Event>) {
        let item = &mut self.batch.items[index];
        item.error_class = Some(FailureClass::RetryableTransient);

        let jitter = rand::thread_rng().gen_range(-1.0..=1.0);
        let mut delay = self.batch.config.retry.delay_for(item.attempts.max(1), jitter);
        if let Some(hint) = failure.retry_after() {
            delay = delay.max(hint);
        }

        process_info!(
            ProcessId::current(),
            "🔁 Retrying {} in {}ms after attempt {}: {}",
            item.identity,
            delay.as_millis(),
            item.attempts,
            failure
        );

        self.phases[index] = Phase::Backoff;
        self.transition(index, ItemStatus::Queued);

        let events = events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(Event::RetryReady(index));
        });
    }

    fn begin_stop(&mut self) {
        self.stopping = true;
        self.batch.cancel_requested = true;
        process_info!(ProcessId::current(), "🛑 Stop requested for batch {}", self.batch.id);

        self.ready.clear();
        for index in 0..self.phases.len() {
            if matches!(self.phases[index], Phase::Ready | Phase::Backoff | Phase::CacheWait) {
                self.skip(index);
            }
        }
    }

    fn finish_reused(&mut self, index: usize, references: Vec<String>) {
        self.batch.items[index].reused_refs = references;
        self.transition(index, ItemStatus::Reused);
    }

    /// Nothing left in the budget can pay for this item
    fn exhaust_budget(&mut self, index: usize, budget: f64) {
        if let Some(reservation) = self.reservations.remove(&index) {
            self.abandoned.push(reservation);
        }
        if !self.batch.budget_exhausted {
            process_warn!(
                ProcessId::current(),
                "💸 Budget of {:.2} for batch {} is spent ({:.2}); skipping remaining generation",
                budget,
                self.batch.id,
                self.spent
            );
        }
        self.batch.budget_exhausted = true;
        let item = &mut self.batch.items[index];
        item.error_class = Some(FailureClass::BudgetExhausted);
        item.last_error = Some(format!("budget of {budget:.2} exhausted"));
        self.transition(index, ItemStatus::Skipped);
    }

    fn skip(&mut self, index: usize) {
        if let Some(reservation) = self.reservations.remove(&index) {
            self.abandoned.push(reservation);
        }
        self.batch.items[index].error_class = Some(FailureClass::Cancelled);
        self.transition(index, ItemStatus::Skipped);
    }

    fn fail(&mut self, index: usize, class: FailureClass) {
        if let Some(reservation) = self.reservations.remove(&index) {
            self.abandoned.push(reservation);
        }
        let item = &mut self.batch.items[index];
        item.error_class = Some(class);
        process_error!(
            ProcessId::current(),
            "❌ {} failed after {} attempt(s) ({}): {}",
            item.identity,
            item.attempts,
            class,
            item.last_error.as_deref().unwrap_or("unknown error")
        );
        self.transition(index, ItemStatus::Failed);
    }

    fn transition(&mut self, index: usize, to: ItemStatus) {
        let item = &mut self.batch.items[index];
        let from = item.status;
        item.status = to;
        if to.is_terminal() {
            self.terminal += 1;
            self.phases[index] = Phase::Done;
        }
        self.reporter.publish(ProgressEvent::ItemTransition {
            identity: item.identity.clone(),
            from,
            to,
        });
    }

    /// Release given-up reservations so waiters elsewhere can claim them
    async fn release_abandoned(&mut self) {
        for reservation in std::mem::take(&mut self.abandoned) {
            reservation.abandon().await;
        }
    }

    fn rate(&self, credential: &str) -> f64 {
        self.rates.get(credential).copied().unwrap_or(0.0)
    }

    fn record_usage(&mut self, report: &WorkReport) {
        let rate = self.rate(&report.credential);
        if let Some(usage) = self.usage.get_mut(&report.credential) {
            usage.token_wait_ms += report.token_wait.as_millis() as u64;
            if report.issued {
                usage.requests += 1;
                match &report.outcome {
                    Ok(references) => {
                        usage.successes += 1;
                        usage.images += references.len() as u64;
                        usage.cost += references.len() as f64 * rate;
                    }
                    Err(_) => usage.failures += 1,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryCacheBackend;
    use producer::SimulatedProvider;
    use shared::{BatchConfig, CredentialConfig, SourceDescriptor};

    fn dispatcher(batch: Batch, provider: Arc<SimulatedProvider>, stop: watch::Receiver<bool>) -> Dispatcher {
        let credentials = vec![CredentialConfig::custom("sim-1", "sim-key-0001", 5, 5.0, 2)];
        dispatcher_with(credentials, batch, provider, stop)
    }

    fn dispatcher_with(
        credentials: Vec<CredentialConfig>,
        batch: Batch,
        provider: Arc<SimulatedProvider>,
        stop: watch::Receiver<bool>,
    ) -> Dispatcher {
        let pool = WorkerPool::new(credentials, provider).unwrap();
        let reporter = ProgressReporter::new(batch.id, batch.items.len());
        let cache = ReuseCache::new(Arc::new(MemoryCacheBackend::new()));
        Dispatcher::new(batch, pool, cache, reporter, stop)
    }

    fn batch(count: usize) -> Batch {
        let sources = (0..count)
            .map(|n| SourceDescriptor::new(format!("sku-{n}"), format!("blob://{n}")))
            .collect();
        Batch::new(sources, BatchConfig::default())
    }

    #[tokio::test]
    async fn test_stop_before_start_skips_everything() {
        let provider = Arc::new(SimulatedProvider::instant());
        let (_stop, stop_rx) = watch::channel(true);

        let outcome = dispatcher(batch(4), provider.clone(), stop_rx).run().await;

        assert_eq!(outcome.batch.status, BatchStatus::Stopped);
        assert!(outcome.batch.cancel_requested);
        assert_eq!(outcome.batch.count(ItemStatus::Skipped), 4);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_usage_is_reported_per_credential() {
        let provider = Arc::new(SimulatedProvider::instant());
        let (_stop, stop_rx) = watch::channel(false);

        let outcome = dispatcher(batch(3), provider, stop_rx).run().await;

        assert_eq!(outcome.batch.status, BatchStatus::Completed);
        assert_eq!(outcome.credential_usage.len(), 1);
        let usage = &outcome.credential_usage[0];
        assert_eq!(usage.name, "sim-1");
        assert_eq!(usage.requests, 3);
        assert_eq!(usage.successes, 3);
        assert!(outcome.batch.items.iter().all(|item| item.credential.as_deref() == Some("sim-1")));
    }

    #[tokio::test]
    async fn test_batch_cap_limits_in_flight_items() {
        let provider = Arc::new(SimulatedProvider::new(Duration::from_millis(20), Duration::from_millis(20), 0.0));
        let (_stop, stop_rx) = watch::channel(false);
        let mut capped = batch(6);
        capped.config.max_concurrency = Some(1);

        let dispatcher = dispatcher(capped, provider, stop_rx);
        let reporter = dispatcher.reporter.clone();
        let mut watch = reporter.watch();
        let observer = tokio::spawn(async move {
            let mut peak = 0;
            while watch.changed().await.is_ok() {
                let snapshot = watch.borrow_and_update().clone();
                peak = peak.max(snapshot.dispatched);
                if snapshot.completed {
                    break;
                }
            }
            peak
        });

        let outcome = dispatcher.run().await;
        assert_eq!(outcome.batch.count(ItemStatus::Succeeded), 6);
        assert!(observer.await.unwrap() <= 1);
    }

    #[tokio::test]
    async fn test_budget_skips_items_it_cannot_pay_for() {
        let provider = Arc::new(SimulatedProvider::instant());
        let (_stop, stop_rx) = watch::channel(false);
        let credentials = vec![CredentialConfig::custom("sim-1", "sim-key-0001", 10, 10.0, 2).with_cost(1.0)];
        let mut capped = batch(4);
        capped.config.budget = Some(2.0);

        let outcome = dispatcher_with(credentials, capped, provider.clone(), stop_rx).run().await;

        assert_eq!(outcome.batch.status, BatchStatus::Completed);
        assert!(outcome.batch.budget_exhausted);
        assert_eq!(outcome.batch.count(ItemStatus::Succeeded), 2);
        assert_eq!(outcome.batch.count(ItemStatus::Skipped), 2);
        assert_eq!(provider.calls(), 2);
        for item in outcome.batch.items.iter().filter(|item| item.status == ItemStatus::Skipped) {
            assert_eq!(item.error_class, Some(FailureClass::BudgetExhausted));
            assert_eq!(item.cost, 0.0);
        }

        let usage = &outcome.credential_usage[0];
        assert_eq!(usage.images, 2);
        assert!((usage.cost - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_regenerating_over_incomplete_record_is_tagged() {
        let backend = Arc::new(MemoryCacheBackend::new());
        let mut torn = shared::CacheEntry::new(shared::SourceIdentity::from("sku-0"));
        torn.complete = false;
        backend.seed(torn).await;

        let provider = Arc::new(SimulatedProvider::instant());
        let (_stop, stop_rx) = watch::channel(false);
        let credentials = vec![CredentialConfig::custom("sim-1", "sim-key-0001", 5, 5.0, 2)];
        let pool = WorkerPool::new(credentials, provider).unwrap();
        let work = batch(2);
        let reporter = ProgressReporter::new(work.id, work.items.len());
        let cache = ReuseCache::new(backend);

        let outcome = Dispatcher::new(work, pool, cache.clone(), reporter, stop_rx).run().await;

        assert_eq!(outcome.batch.count(ItemStatus::Succeeded), 2);
        assert_eq!(outcome.batch.items[0].error_class, Some(FailureClass::CacheInconsistency));
        assert_eq!(outcome.batch.items[1].error_class, None);
        assert!(cache.stats().inconsistencies >= 1);
        assert_eq!(cache.in_flight(), 0);
    }
}
