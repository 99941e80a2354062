//! Simulated generation provider for demos, load tests and keyless runs

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use rand::Rng;

use shared::{CredentialConfig, GenerationFailure};
use crate::traits::GenerationProvider;
use crate::types::GenerationRequest;

/// Provider with random latency and an injectable transient failure rate.
/// Returns `sim://` references.
pub struct SimulatedProvider {
    min_latency: Duration,
    max_latency: Duration,
    failure_rate: f64,
    calls: AtomicU64,
}

impl SimulatedProvider {
    pub fn new(min_latency: Duration, max_latency: Duration, failure_rate: f64) -> Self {
        Self {
            min_latency,
            max_latency: max_latency.max(min_latency),
            failure_rate: failure_rate.clamp(0.0, 1.0),
            calls: AtomicU64::new(0),
        }
    }

    /// Zero latency, never fails
    pub fn instant() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 0.0)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Draw latency and failure up front; the rng must not live across an await
    fn draw(&self) -> (Duration, Option<GenerationFailure>) {
        let mut rng = rand::thread_rng();
        let latency = if self.max_latency > self.min_latency {
            rng.gen_range(self.min_latency..=self.max_latency)
        } else {
            self.min_latency
        };
        let failure = if self.failure_rate > 0.0 && rng.gen_bool(self.failure_rate) {
            Some(match rng.gen_range(0..3) {
                0 => GenerationFailure::NetworkError("simulated connection reset".to_string()),
                1 => GenerationFailure::RateLimited { retry_after_ms: None },
                _ => GenerationFailure::ServerError {
                    status: 503,
                    message: "simulated overload".to_string(),
                },
            })
        } else {
            None
        };
        (latency, failure)
    }
}

impl Default for SimulatedProvider {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_millis(800), 0.05)
    }
}

#[async_trait]
impl GenerationProvider for SimulatedProvider {
    fn method(&self) -> String {
        "simulated".to_string()
    }

    async fn generate(
        &self,
        credential: &CredentialConfig,
        request: &GenerationRequest,
    ) -> Result<Vec<String>, GenerationFailure> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let (latency, failure) = self.draw();

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(failure) = failure {
            return Err(failure);
        }

        Ok((1..=request.variants)
            .map(|variant| format!("sim://{}/{}/{}-{}", request.identity, credential.name, call, variant))
            .collect())
    }
}
