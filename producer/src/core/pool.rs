//! Pool of generation workers sharing one release signal

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Notify;

use shared::CredentialConfig;

use crate::core::slot::CredentialSlot;
use crate::core::worker::GenerationWorker;
use crate::error::{ProducerError, ProducerResult};
use crate::traits::GenerationProvider;

/// One worker per credential. Cloning shares the workers.
#[derive(Clone)]
pub struct WorkerPool {
    workers: Vec<Arc<GenerationWorker>>,
    released: Arc<Notify>,
}

impl WorkerPool {
    pub fn new(credentials: Vec<CredentialConfig>, provider: Arc<dyn GenerationProvider>) -> ProducerResult<Self> {
        if credentials.is_empty() {
            return Err(ProducerError::ConfigError {
                message: "At least one credential is required".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for credential in &credentials {
            if !seen.insert(credential.name.clone()) {
                return Err(ProducerError::InvalidCredential {
                    name: credential.name.clone(),
                    reason: "duplicate credential name".to_string(),
                });
            }
        }

        let released = Arc::new(Notify::new());
        let workers = credentials
            .into_iter()
            .map(|config| {
                CredentialSlot::new(config).map(|slot| {
                    Arc::new(GenerationWorker::new(slot.with_release_signal(released.clone()), provider.clone()))
                })
            })
            .collect::<ProducerResult<Vec<_>>>()?;

        Ok(Self { workers, released })
    }

    pub fn workers(&self) -> &[Arc<GenerationWorker>] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Notified whenever any worker in the pool frees a concurrency permit
    pub fn release_signal(&self) -> Arc<Notify> {
        self.released.clone()
    }

    /// Upper bound on simultaneously running items across the pool
    pub fn total_concurrency(&self) -> usize {
        self.workers
            .iter()
            .map(|worker| worker.slot().config().max_concurrent as usize)
            .sum()
    }

    /// Restrict the pool to the named credentials, keeping the shared workers.
    /// `None` keeps every worker.
    pub fn subset(&self, names: Option<&[String]>) -> ProducerResult<Self> {
        let Some(names) = names else {
            return Ok(self.clone());
        };
        if names.is_empty() {
            return Err(ProducerError::ConfigError {
                message: "Credential subset must name at least one credential".to_string(),
            });
        }

        let mut workers = Vec::with_capacity(names.len());
        for name in names {
            let worker = self
                .workers
                .iter()
                .find(|worker| worker.name() == name)
                .ok_or_else(|| ProducerError::UnknownCredential { name: name.clone() })?;
            if !workers.iter().any(|w: &Arc<GenerationWorker>| w.name() == name) {
                workers.push(worker.clone());
            }
        }

        Ok(Self {
            workers,
            released: self.released.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::SimulatedProvider;

    fn pool() -> WorkerPool {
        WorkerPool::new(
            vec![
                CredentialConfig::custom("key-1", "a", 1, 1.0, 2),
                CredentialConfig::custom("key-2", "b", 1, 1.0, 1),
            ],
            Arc::new(SimulatedProvider::instant()),
        )
        .unwrap()
    }

    #[test]
    fn test_pool_sums_concurrency() {
        let pool = pool();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.total_concurrency(), 3);
    }

    #[test]
    fn test_subset_shares_workers() {
        let pool = pool();
        let subset = pool.subset(Some(&["key-2".to_string()])).unwrap();
        assert_eq!(subset.len(), 1);
        assert!(Arc::ptr_eq(&subset.workers()[0], &pool.workers()[1]));

        let _held = subset.workers()[0].try_reserve().unwrap();
        assert!(pool.workers()[1].try_reserve().is_none());
    }

    #[test]
    fn test_unknown_and_duplicate_credentials_are_rejected() {
        let pool = pool();
        assert!(matches!(
            pool.subset(Some(&["key-9".to_string()])),
            Err(ProducerError::UnknownCredential { .. })
        ));

        let duplicate = WorkerPool::new(
            vec![
                CredentialConfig::custom("key-1", "a", 1, 1.0, 1),
                CredentialConfig::custom("key-1", "b", 1, 1.0, 1),
            ],
            Arc::new(SimulatedProvider::instant()),
        );
        assert!(duplicate.is_err());
        assert!(WorkerPool::new(vec![], Arc::new(SimulatedProvider::instant())).is_err());
    }
}
