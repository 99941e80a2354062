//! Shared helpers for orchestrator integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use tokio::time::Instant;

use orchestrator::services::MemoryCacheBackend;
use orchestrator::{BatchService, ReuseCache};
use producer::{GenerationProvider, GenerationRequest, WorkerPool};
use shared::{BatchConfig, CredentialConfig, GenerationFailure, RetryPolicy, SourceDescriptor};

/// Provider that records every call and fails scripted identities
pub struct ScriptedProvider {
    delay: Duration,
    /// Failures handed out, in order, before an identity succeeds
    script: Mutex<HashMap<String, Vec<GenerationFailure>>>,
    calls: Mutex<Vec<(String, Instant)>>,
}

impl ScriptedProvider {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn instant() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn fail(self, identity: &str, failures: Vec<GenerationFailure>) -> Self {
        self.script.lock().unwrap().insert(identity.to_string(), failures);
        self
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, identity: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(id, _)| id == identity).count()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn method(&self) -> String {
        "scripted".to_string()
    }

    async fn generate(
        &self,
        credential: &CredentialConfig,
        request: &GenerationRequest,
    ) -> Result<Vec<String>, GenerationFailure> {
        let identity = request.identity.to_string();
        self.calls.lock().unwrap().push((identity.clone(), Instant::now()));

        let failure = {
            let mut script = self.script.lock().unwrap();
            script.get_mut(&identity).and_then(|failures| {
                if failures.is_empty() {
                    None
                } else {
                    Some(failures.remove(0))
                }
            })
        };

        tokio::time::sleep(self.delay).await;
        match failure {
            Some(failure) => Err(failure),
            None => Ok((0..request.variants)
                .map(|n| format!("scripted://{identity}/{}/{n}", credential.name))
                .collect()),
        }
    }
}

pub fn server_error() -> GenerationFailure {
    GenerationFailure::ServerError {
        status: 503,
        message: "overloaded".to_string(),
    }
}

pub fn sources(range: std::ops::Range<usize>) -> Vec<SourceDescriptor> {
    range
        .map(|n| SourceDescriptor::new(format!("sku-{n}"), format!("blob://catalog/sku-{n}.jpg")))
        .collect()
}

/// Defaults with deterministic backoff
pub fn config(max_attempts: u32) -> BatchConfig {
    BatchConfig {
        retry: RetryPolicy {
            max_attempts,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: 0.0,
        },
        ..BatchConfig::default()
    }
}

pub fn credentials(count: usize, capacity: u32, refill_per_second: f64, max_concurrent: u32) -> Vec<CredentialConfig> {
    (1..=count)
        .map(|n| CredentialConfig::custom(format!("key-{n}"), format!("test-key-{n:04}"), capacity, refill_per_second, max_concurrent))
        .collect()
}

pub fn service(credentials: Vec<CredentialConfig>, provider: Arc<ScriptedProvider>) -> BatchService {
    service_with_cache(credentials, provider, ReuseCache::new(Arc::new(MemoryCacheBackend::new())))
}

pub fn service_with_cache(
    credentials: Vec<CredentialConfig>,
    provider: Arc<ScriptedProvider>,
    cache: ReuseCache,
) -> BatchService {
    let pool = WorkerPool::new(credentials, provider).unwrap();
    BatchService::new(pool, cache)
}
