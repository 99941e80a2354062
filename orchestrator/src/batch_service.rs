//! Batch submission service
//!
//! Accepts batch requests, runs each batch on its own dispatcher task and keeps
//! a handle per batch for status queries, stop requests, progress
//! subscriptions and the final manifest. Every batch shares the same worker
//! pool, reuse cache and cost ledger.
//!
//! Finished batches beyond the retention limit are dropped from the registry,
//! oldest first, when the next batch is submitted. With a manifest directory
//! configured their manifests stay readable from disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::sync::{watch, RwLock};

use producer::WorkerPool;
use shared::{
    Batch, BatchId, BatchRequest, BatchStatusView, CostSummary, CredentialView, Manifest, ProcessId,
    process_debug, process_info, process_warn,
};

use crate::core::{finalize, CacheStats, CostLedger, Dispatcher, ProgressReporter, ProgressStream, ReuseCache};
use crate::error::{OrchestratorError, OrchestratorResult};

/// Finished batches kept in memory
pub const DEFAULT_RETENTION: usize = 100;

struct BatchHandle {
    created_at: DateTime<Utc>,
    stop: watch::Sender<bool>,
    reporter: ProgressReporter,
    manifest: watch::Receiver<Option<Arc<Manifest>>>,
}

impl BatchHandle {
    fn is_finished(&self) -> bool {
        self.manifest.borrow().is_some()
    }

    fn view(&self, batch_id: BatchId) -> BatchStatusView {
        let snapshot = self.reporter.latest();
        BatchStatusView {
            batch_id,
            status: snapshot.status,
            created_at: self.created_at,
            stop_requested: *self.stop.borrow(),
            manifest_ready: self.is_finished(),
            snapshot,
        }
    }
}

/// Front door for batches. Cloning shares the registry.
#[derive(Clone)]
pub struct BatchService {
    pool: WorkerPool,
    cache: ReuseCache,
    ledger: CostLedger,
    batches: Arc<RwLock<HashMap<BatchId, BatchHandle>>>,
    retention: usize,
    manifest_dir: Option<PathBuf>,
}

impl BatchService {
    pub fn new(pool: WorkerPool, cache: ReuseCache) -> Self {
        Self {
            pool,
            cache,
            ledger: CostLedger::new(),
            batches: Arc::new(RwLock::new(HashMap::new())),
            retention: DEFAULT_RETENTION,
            manifest_dir: None,
        }
    }

    /// Keep at most `retention` finished batches in memory
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention;
        self
    }

    /// Write every manifest to `<dir>/<batch id>.json` as its batch finishes
    pub fn with_manifest_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.manifest_dir = Some(dir.into());
        self
    }

    /// Validate and start a batch; returns as soon as the dispatcher is running
    pub async fn submit(&self, request: BatchRequest) -> OrchestratorResult<BatchId> {
        validate(&request)?;
        let pool = self.pool.subset(request.config.credentials.as_deref())?;
        self.evict_finished().await;

        let batch = Batch::new(request.sources, request.config);
        let batch_id = batch.id;
        let created_at = batch.created_at;
        let reporter = ProgressReporter::new(batch_id, batch.items.len());
        let (stop, stop_rx) = watch::channel(false);
        let (manifest_tx, manifest) = watch::channel(None);

        process_info!(
            ProcessId::current(),
            "📥 Accepted batch {} with {} item(s)",
            batch_id,
            batch.items.len()
        );

        let dispatcher = Dispatcher::new(batch, pool, self.cache.clone(), reporter.clone(), stop_rx);
        self.batches.write().await.insert(
            batch_id,
            BatchHandle {
                created_at,
                stop,
                reporter,
                manifest,
            },
        );

        let ledger = self.ledger.clone();
        let manifest_dir = self.manifest_dir.clone();
        tokio::spawn(async move {
            let outcome = dispatcher.run().await;
            let manifest = finalize(&outcome.batch, outcome.credential_usage, outcome.elapsed, Utc::now());
            ledger.record(&manifest).await;
            if let Some(dir) = manifest_dir {
                if let Err(e) = write_manifest(&dir, &manifest).await {
                    process_warn!(ProcessId::current(), "⚠️ Could not write manifest for batch {}: {}", batch_id, e);
                }
            }
            let _ = manifest_tx.send(Some(Arc::new(manifest)));
        });

        Ok(batch_id)
    }

    pub async fn status(&self, batch_id: BatchId) -> OrchestratorResult<BatchStatusView> {
        let batches = self.batches.read().await;
        let handle = batches.get(&batch_id).ok_or(OrchestratorError::BatchNotFound { batch_id })?;
        Ok(handle.view(batch_id))
    }

    /// Request a cooperative stop; in-flight items finish, nothing new starts
    pub async fn stop(&self, batch_id: BatchId) -> OrchestratorResult<()> {
        let batches = self.batches.read().await;
        let handle = batches.get(&batch_id).ok_or(OrchestratorError::BatchNotFound { batch_id })?;
        if !handle.stop.send_replace(true) {
            process_info!(ProcessId::current(), "🛑 Stop requested for batch {}", batch_id);
        }
        Ok(())
    }

    /// Progress stream for a batch, starting with its current snapshot
    pub async fn subscribe(&self, batch_id: BatchId) -> OrchestratorResult<ProgressStream> {
        let batches = self.batches.read().await;
        let handle = batches.get(&batch_id).ok_or(OrchestratorError::BatchNotFound { batch_id })?;
        Ok(handle.reporter.subscribe())
    }

    /// The manifest of a finished batch, read back from disk once evicted
    pub async fn manifest(&self, batch_id: BatchId) -> OrchestratorResult<Arc<Manifest>> {
        {
            let batches = self.batches.read().await;
            if let Some(handle) = batches.get(&batch_id) {
                let manifest = handle.manifest.borrow().clone();
                return manifest.ok_or(OrchestratorError::ManifestNotReady { batch_id });
            }
        }
        self.stored_manifest(batch_id).await
    }

    /// Wait until the batch finishes and return its manifest
    pub async fn wait(&self, batch_id: BatchId) -> OrchestratorResult<Arc<Manifest>> {
        let registered = {
            let batches = self.batches.read().await;
            batches.get(&batch_id).map(|handle| handle.manifest.clone())
        };
        let Some(mut manifest) = registered else {
            return self.stored_manifest(batch_id).await;
        };

        let ready = manifest
            .wait_for(|manifest| manifest.is_some())
            .await
            .map_err(|_| OrchestratorError::ManifestNotReady { batch_id })?;
        ready.clone().ok_or(OrchestratorError::ManifestNotReady { batch_id })
    }

    /// Every known batch, oldest first
    pub async fn list(&self) -> Vec<BatchStatusView> {
        let batches = self.batches.read().await;
        let mut views: Vec<_> = batches.iter().map(|(id, handle)| handle.view(*id)).collect();
        views.sort_by_key(|view| view.created_at);
        views
    }

    pub fn credentials(&self) -> Vec<CredentialView> {
        self.pool
            .workers()
            .iter()
            .map(|worker| {
                let slot = worker.slot();
                let config = slot.config();
                CredentialView {
                    name: config.name.clone(),
                    tier: config.tier,
                    masked_key: config.masked_key(),
                    capacity: config.capacity,
                    refill_per_second: config.refill_per_second,
                    max_concurrent: config.max_concurrent,
                    cost_per_image: config.cost_per_image,
                    available_tokens: slot.limiter().available(),
                    in_flight: slot.in_flight(),
                    usage: slot.usage(),
                }
            })
            .collect()
    }

    pub fn cache(&self) -> &ReuseCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Spend of every batch finished by this service
    pub async fn costs(&self) -> CostSummary {
        self.ledger.summary().await
    }

    async fn stored_manifest(&self, batch_id: BatchId) -> OrchestratorResult<Arc<Manifest>> {
        let Some(dir) = &self.manifest_dir else {
            return Err(OrchestratorError::BatchNotFound { batch_id });
        };
        let content = match fs::read_to_string(manifest_path(dir, batch_id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OrchestratorError::BatchNotFound { batch_id });
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Arc::new(serde_json::from_str(&content)?))
    }

    /// Drop the oldest finished batches beyond the retention limit
    async fn evict_finished(&self) {
        let mut batches = self.batches.write().await;
        let mut finished: Vec<(DateTime<Utc>, BatchId)> = batches
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(id, handle)| (handle.created_at, *id))
            .collect();
        if finished.len() <= self.retention {
            return;
        }

        finished.sort_by_key(|(created_at, _)| *created_at);
        let excess = finished.len() - self.retention;
        for (_, batch_id) in finished.into_iter().take(excess) {
            batches.remove(&batch_id);
            process_debug!(ProcessId::current(), "🧹 Evicted finished batch {}", batch_id);
        }
    }
}

fn manifest_path(dir: &Path, batch_id: BatchId) -> PathBuf {
    dir.join(format!("{batch_id}.json"))
}

async fn write_manifest(dir: &Path, manifest: &Manifest) -> OrchestratorResult<()> {
    fs::create_dir_all(dir).await?;
    fs::write(manifest_path(dir, manifest.batch_id), manifest.to_json_pretty()?).await?;
    Ok(())
}

fn validate(request: &BatchRequest) -> OrchestratorResult<()> {
    request.config.validate()?;

    for (position, source) in request.sources.iter().enumerate() {
        if source.identity.as_str().trim().is_empty() {
            return Err(OrchestratorError::invalid_batch(format!(
                "source {position} has an empty identity"
            )));
        }
        if source.source_ref.trim().is_empty() {
            return Err(OrchestratorError::invalid_batch(format!(
                "source {} has an empty source reference",
                source.identity
            )));
        }
        if source.variant_count == Some(0) {
            return Err(OrchestratorError::invalid_batch(format!(
                "source {} requests zero variants",
                source.identity
            )));
        }
    }
    Ok(())
}
