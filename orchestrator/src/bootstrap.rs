//! Service construction shared by the CLI and the webserver
//!
//! Picks the credential source and generation provider for the selected mode,
//! builds the worker pool and opens the reuse cache backend.

use std::path::PathBuf;
use std::sync::Arc;
use clap::ValueEnum;

use producer::{GenerationProvider, HttpGenerationProvider, SimulatedProvider, WorkerPool};
use shared::{ProcessId, process_info};

use crate::batch_service::{BatchService, DEFAULT_RETENTION};
use crate::core::ReuseCache;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::services::{FileCacheBackend, MemoryCacheBackend, RealCredentialSource, SimulatedCredentialSource};
use crate::traits::{CacheBackend, CredentialSource};

/// Which generation provider backs the workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderMode {
    /// Simulated provider with synthetic keyless credentials
    Random,
    /// HTTP provider with credentials from the environment
    Http,
}

#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub provider: ProviderMode,
    /// Required for `ProviderMode::Http`
    pub endpoint: Option<String>,
    /// Number of synthetic credentials in random mode
    pub simulated_credentials: usize,
    /// JSON-lines reuse cache; in-memory when absent
    pub cache_file: Option<PathBuf>,
    /// Where finished manifests are written; memory only when absent
    pub manifest_dir: Option<PathBuf>,
    /// Finished batches kept in memory
    pub retention: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            provider: ProviderMode::Random,
            endpoint: None,
            simulated_credentials: 3,
            cache_file: None,
            manifest_dir: None,
            retention: DEFAULT_RETENTION,
        }
    }
}

pub async fn build_service(options: &ServiceOptions) -> OrchestratorResult<BatchService> {
    let (credentials, provider): (Box<dyn CredentialSource>, Arc<dyn GenerationProvider>) = match options.provider {
        ProviderMode::Random => (
            Box::new(SimulatedCredentialSource::new(options.simulated_credentials)),
            Arc::new(SimulatedProvider::default()),
        ),
        ProviderMode::Http => {
            let endpoint = options
                .endpoint
                .clone()
                .ok_or_else(|| OrchestratorError::config("endpoint", "required with the http provider"))?;
            (
                Box::new(RealCredentialSource::new()),
                Arc::new(HttpGenerationProvider::new(endpoint)?),
            )
        }
    };

    let backend: Arc<dyn CacheBackend> = match &options.cache_file {
        Some(path) => Arc::new(FileCacheBackend::open(path).await?),
        None => Arc::new(MemoryCacheBackend::new()),
    };

    let cache_label = options
        .cache_file
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "in-memory".to_string());

    let service = assemble(credentials.as_ref(), provider, backend, &cache_label)
        .await?
        .with_retention(options.retention);
    Ok(match &options.manifest_dir {
        Some(dir) => service.with_manifest_dir(dir),
        None => service,
    })
}

/// Load credentials into a worker pool and wrap it in a batch service
pub async fn assemble(
    credentials: &dyn CredentialSource,
    provider: Arc<dyn GenerationProvider>,
    backend: Arc<dyn CacheBackend>,
    cache_label: &str,
) -> OrchestratorResult<BatchService> {
    let pool = WorkerPool::new(credentials.load().await?, provider)?;

    process_info!(
        ProcessId::current(),
        "⚙️ {} worker(s) ready, {} total concurrency, cache: {}",
        pool.len(),
        pool.total_concurrency(),
        cache_label
    );

    Ok(BatchService::new(pool, ReuseCache::new(backend)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockCredentialSource;
    use shared::CredentialConfig;

    #[tokio::test]
    async fn test_http_mode_requires_endpoint() {
        let options = ServiceOptions {
            provider: ProviderMode::Http,
            ..ServiceOptions::default()
        };
        assert!(matches!(
            build_service(&options).await,
            Err(OrchestratorError::ConfigurationError { .. })
        ));
    }

    #[tokio::test]
    async fn test_assemble_uses_loaded_credentials() {
        let mut source = MockCredentialSource::new();
        source
            .expect_load()
            .times(1)
            .returning(|| Ok(vec![CredentialConfig::custom("primary", "primary-key-123", 4, 2.0, 1)]));

        let service = assemble(
            &source,
            Arc::new(SimulatedProvider::instant()),
            Arc::new(MemoryCacheBackend::new()),
            "in-memory",
        )
        .await
        .unwrap();

        let credentials = service.credentials();
        assert_eq!(credentials.len(), 1);
        assert_eq!(credentials[0].name, "primary");
        assert_eq!(credentials[0].max_concurrent, 1);
    }

    #[tokio::test]
    async fn test_assemble_propagates_load_failure() {
        let mut source = MockCredentialSource::new();
        source.expect_load().returning(|| {
            Err(OrchestratorError::NoCredentials {
                message: "nothing configured".to_string(),
            })
        });

        let result = assemble(
            &source,
            Arc::new(SimulatedProvider::instant()),
            Arc::new(MemoryCacheBackend::new()),
            "in-memory",
        )
        .await;
        assert!(matches!(result, Err(OrchestratorError::NoCredentials { .. })));
    }

    #[tokio::test]
    async fn test_random_mode_builds_simulated_pool() {
        let service = build_service(&ServiceOptions::default()).await.unwrap();
        let names: Vec<_> = service.credentials().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["sim-1", "sim-2", "sim-3"]);
    }
}
