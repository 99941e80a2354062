//! Progress reporter
//!
//! Running counters are updated in O(1) per transition. Snapshots are broadcast
//! on batch start, on every terminal item transition and on batch finish; the
//! latest snapshot is always readable. Broadcast buffering is bounded per
//! subscriber and a lagging subscriber loses its oldest snapshots, so a stalled
//! observer never blocks the dispatcher.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

use shared::{BatchId, BatchStatus, ItemStatus, ProgressEvent, ProgressSnapshot};

/// Snapshots buffered per subscriber before the oldest are dropped
pub const DEFAULT_PROGRESS_BUFFER: usize = 256;

struct Tracker {
    snapshot: ProgressSnapshot,
    started: Option<Instant>,
}

impl Tracker {
    fn counter(&mut self, status: ItemStatus) -> &mut usize {
        let snapshot = &mut self.snapshot;
        match status {
            ItemStatus::Queued => &mut snapshot.queued,
            ItemStatus::Dispatched => &mut snapshot.dispatched,
            ItemStatus::Succeeded => &mut snapshot.succeeded,
            ItemStatus::Reused => &mut snapshot.reused,
            ItemStatus::Failed => &mut snapshot.failed,
            ItemStatus::Skipped => &mut snapshot.skipped,
        }
    }

    fn refresh(&mut self) {
        let now = Instant::now();
        let snapshot = &mut self.snapshot;
        let terminal = snapshot.terminal();
        let remaining = snapshot.total.saturating_sub(terminal);
        let elapsed = self.started.map(|started| now.duration_since(started)).unwrap_or_default();

        snapshot.elapsed_ms = elapsed.as_millis() as u64;
        snapshot.percent_complete = if snapshot.total == 0 {
            100.0
        } else {
            terminal as f64 / snapshot.total as f64 * 100.0
        };
        snapshot.eta_seconds = if remaining == 0 {
            Some(0.0)
        } else if terminal == 0 {
            None
        } else {
            Some(elapsed.as_secs_f64() / terminal as f64 * remaining as f64)
        };
        snapshot.sequence += 1;
    }
}

struct ReporterInner {
    tracker: Mutex<Tracker>,
    broadcast: broadcast::Sender<ProgressSnapshot>,
    latest: watch::Sender<ProgressSnapshot>,
}

/// Publishes progress for one batch. Cloning shares the reporter.
#[derive(Clone)]
pub struct ProgressReporter {
    inner: Arc<ReporterInner>,
}

impl ProgressReporter {
    pub fn new(batch_id: BatchId, total: usize) -> Self {
        Self::with_buffer(batch_id, total, DEFAULT_PROGRESS_BUFFER)
    }

    pub fn with_buffer(batch_id: BatchId, total: usize, buffer: usize) -> Self {
        let snapshot = ProgressSnapshot::empty(batch_id, total);
        let (broadcast, _) = broadcast::channel(buffer.max(1));
        let (latest, _) = watch::channel(snapshot.clone());

        Self {
            inner: Arc::new(ReporterInner {
                tracker: Mutex::new(Tracker { snapshot, started: None }),
                broadcast,
                latest,
            }),
        }
    }

    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        self.inner.tracker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply one event; never blocks on observers
    pub fn publish(&self, event: ProgressEvent) {
        let mut tracker = self.tracker();
        let broadcast = match event {
            ProgressEvent::BatchStarted { total } => {
                tracker.started = Some(Instant::now());
                tracker.snapshot.total = total;
                tracker.snapshot.status = BatchStatus::Running;
                true
            }
            ProgressEvent::ItemTransition { identity, from, to } => {
                let from_count = tracker.counter(from);
                *from_count = from_count.saturating_sub(1);
                *tracker.counter(to) += 1;
                if to == ItemStatus::Dispatched {
                    tracker.snapshot.current_item = Some(identity);
                }
                to.is_terminal()
            }
            ProgressEvent::BatchFinished { status } => {
                tracker.snapshot.status = status;
                tracker.snapshot.completed = true;
                tracker.snapshot.current_item = None;
                true
            }
        };

        tracker.refresh();
        let snapshot = tracker.snapshot.clone();
        // Both sends happen under the tracker lock so observers see sequences in order
        self.inner.latest.send_replace(snapshot.clone());
        if broadcast {
            // No subscribers is fine
            let _ = self.inner.broadcast.send(snapshot);
        }
    }

    /// Most recent snapshot
    pub fn latest(&self) -> ProgressSnapshot {
        self.inner.latest.borrow().clone()
    }

    /// Receiver that always holds the latest snapshot
    pub fn watch(&self) -> watch::Receiver<ProgressSnapshot> {
        self.inner.latest.subscribe()
    }

    /// Stream of snapshots, starting with the current one
    pub fn subscribe(&self) -> ProgressStream {
        let receiver = self.inner.broadcast.subscribe();
        let initial = self.latest();
        ProgressStream {
            last_sequence: None,
            initial: Some(initial),
            receiver,
            done: false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcast.receiver_count()
    }
}

/// Per-observer snapshot stream; ends after the completion snapshot
pub struct ProgressStream {
    last_sequence: Option<u64>,
    initial: Option<ProgressSnapshot>,
    receiver: broadcast::Receiver<ProgressSnapshot>,
    done: bool,
}

impl ProgressStream {
    pub async fn next(&mut self) -> Option<ProgressSnapshot> {
        if self.done {
            return None;
        }

        if let Some(snapshot) = self.initial.take() {
            return Some(self.emit(snapshot));
        }

        loop {
            match self.receiver.recv().await {
                Ok(snapshot) => {
                    if self.last_sequence.is_some_and(|last| snapshot.sequence <= last) {
                        continue;
                    }
                    return Some(self.emit(snapshot));
                }
                // Oldest snapshots were dropped for this slow observer
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }

    fn emit(&mut self, snapshot: ProgressSnapshot) -> ProgressSnapshot {
        self.last_sequence = Some(snapshot.sequence);
        if snapshot.completed {
            self.done = true;
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::SourceIdentity;
    use std::time::Duration;

    fn transition(identity: &str, from: ItemStatus, to: ItemStatus) -> ProgressEvent {
        ProgressEvent::ItemTransition {
            identity: SourceIdentity::from(identity),
            from,
            to,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_counters_and_eta() {
        let reporter = ProgressReporter::new(BatchId::new(), 4);
        reporter.publish(ProgressEvent::BatchStarted { total: 4 });
        reporter.publish(transition("a", ItemStatus::Queued, ItemStatus::Dispatched));

        let latest = reporter.latest();
        assert_eq!(latest.queued, 3);
        assert_eq!(latest.dispatched, 1);
        assert_eq!(latest.current_item, Some(SourceIdentity::from("a")));
        assert_eq!(latest.eta_seconds, None);

        tokio::time::advance(Duration::from_secs(10)).await;
        reporter.publish(transition("a", ItemStatus::Dispatched, ItemStatus::Succeeded));
        reporter.publish(transition("b", ItemStatus::Queued, ItemStatus::Reused));

        let latest = reporter.latest();
        assert_eq!(latest.succeeded, 1);
        assert_eq!(latest.reused, 1);
        assert_eq!(latest.queued, 2);
        assert_eq!(latest.percent_complete, 50.0);
        // 10 seconds for 2 items, 2 remaining
        assert_eq!(latest.eta_seconds, Some(10.0));
        assert!(!latest.completed);
    }

    #[tokio::test]
    async fn test_stream_starts_with_current_and_ends_after_completion() {
        let reporter = ProgressReporter::new(BatchId::new(), 1);
        reporter.publish(ProgressEvent::BatchStarted { total: 1 });

        let mut stream = reporter.subscribe();
        reporter.publish(transition("a", ItemStatus::Queued, ItemStatus::Dispatched));
        reporter.publish(transition("a", ItemStatus::Dispatched, ItemStatus::Failed));
        reporter.publish(ProgressEvent::BatchFinished {
            status: BatchStatus::Failed,
        });

        let first = stream.next().await.unwrap();
        assert_eq!(first.status, BatchStatus::Running);
        // Non-terminal transitions are not broadcast
        let second = stream.next().await.unwrap();
        assert_eq!(second.failed, 1);
        let last = stream.next().await.unwrap();
        assert!(last.completed);
        assert_eq!(last.status, BatchStatus::Failed);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_slow_subscriber_skips_oldest_without_blocking() {
        let reporter = ProgressReporter::with_buffer(BatchId::new(), 10, 2);
        reporter.publish(ProgressEvent::BatchStarted { total: 10 });
        let mut stream = reporter.subscribe();
        let _ = stream.next().await;

        for n in 0..10 {
            let identity = format!("sku-{n}");
            reporter.publish(transition(&identity, ItemStatus::Queued, ItemStatus::Succeeded));
        }
        reporter.publish(ProgressEvent::BatchFinished {
            status: BatchStatus::Completed,
        });

        let mut received = Vec::new();
        while let Some(snapshot) = stream.next().await {
            received.push(snapshot);
        }
        assert!(received.len() <= 2);
        let last = received.last().unwrap();
        assert!(last.completed);
        assert_eq!(last.succeeded, 10);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_final_snapshot_only() {
        let reporter = ProgressReporter::new(BatchId::new(), 0);
        reporter.publish(ProgressEvent::BatchStarted { total: 0 });
        reporter.publish(ProgressEvent::BatchFinished {
            status: BatchStatus::Completed,
        });

        let mut stream = reporter.subscribe();
        let snapshot = stream.next().await.unwrap();
        assert!(snapshot.completed);
        assert_eq!(snapshot.percent_complete, 100.0);
        assert!(stream.next().await.is_none());
    }
}
