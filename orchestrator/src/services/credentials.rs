//! Credential loading from the environment
//!
//! Credentials are read from:
//! 1. `.env` file in the current directory or parent directories (if present)
//! 2. System environment variables
//!
//! Environment variables take precedence over .env file values.
//!
//! ## Variables
//! For each slot number `n` in `1..=32`:
//! - `GENERATION_API_KEY_<n>`: API key (slots without a key are skipped)
//! - `GENERATION_API_TIER_<n>`: `tier1` (10 images/minute, default) or `free`
//!   (2 images/minute)
//! - `GENERATION_MAX_CONCURRENT_<n>`: in-flight request ceiling, default 1
//! - `GENERATION_COST_PER_IMAGE_<n>`: price of one generated image, default 0.04

use std::collections::HashMap;
use async_trait::async_trait;

use shared::{CredentialConfig, CredentialTier, ProcessId, process_info};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::CredentialSource;

/// Highest slot number read from the environment
pub const MAX_CREDENTIAL_SLOTS: usize = 32;

/// Real credential source using environment variables
pub struct RealCredentialSource {
    /// Fixed variables instead of the process environment
    vars: Option<HashMap<String, String>>,
}

impl RealCredentialSource {
    pub fn new() -> Self {
        Self { vars: None }
    }

    /// Read from the given variables instead of the process environment
    pub fn from_vars(vars: HashMap<String, String>) -> Self {
        Self { vars: Some(vars) }
    }

    /// Load the `.env` file if present; already set variables win
    fn init_env() {
        let _ = dotenv::dotenv();
    }

    fn var(&self, name: &str) -> Option<String> {
        let value = match &self.vars {
            Some(vars) => vars.get(name).cloned(),
            None => std::env::var(name).ok(),
        };
        value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn slot(&self, n: usize) -> OrchestratorResult<Option<CredentialConfig>> {
        let Some(api_key) = self.var(&format!("GENERATION_API_KEY_{n}")) else {
            return Ok(None);
        };

        let tier_var = format!("GENERATION_API_TIER_{n}");
        let tier = match self.var(&tier_var) {
            Some(raw) => raw
                .parse::<CredentialTier>()
                .map_err(|message| OrchestratorError::config(tier_var, message))?,
            None => CredentialTier::Tier1,
        };

        let mut credential = CredentialConfig::for_tier(format!("key-{n}"), api_key, tier);

        let concurrency_var = format!("GENERATION_MAX_CONCURRENT_{n}");
        if let Some(raw) = self.var(&concurrency_var) {
            credential.max_concurrent = raw
                .parse::<u32>()
                .ok()
                .filter(|value| *value > 0)
                .ok_or_else(|| OrchestratorError::config(concurrency_var, format!("expected a positive integer, got {raw}")))?;
        }

        let cost_var = format!("GENERATION_COST_PER_IMAGE_{n}");
        if let Some(raw) = self.var(&cost_var) {
            credential.cost_per_image = raw
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite() && *value >= 0.0)
                .ok_or_else(|| OrchestratorError::config(cost_var, format!("expected a non-negative price, got {raw}")))?;
        }

        Ok(Some(credential))
    }
}

impl Default for RealCredentialSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialSource for RealCredentialSource {
    async fn load(&self) -> OrchestratorResult<Vec<CredentialConfig>> {
        if self.vars.is_none() {
            Self::init_env();
        }

        let mut credentials = Vec::new();
        for n in 1..=MAX_CREDENTIAL_SLOTS {
            if let Some(credential) = self.slot(n)? {
                credentials.push(credential);
            }
        }

        if credentials.is_empty() {
            return Err(OrchestratorError::NoCredentials {
                message: "set GENERATION_API_KEY_1 (and optionally _2.._32) in the environment or .env".to_string(),
            });
        }

        let summary: Vec<String> = credentials
            .iter()
            .map(|credential| format!("{} ({}, {})", credential.name, credential.tier, credential.masked_key()))
            .collect();
        process_info!(ProcessId::current(), "🔑 Loaded {} credential(s): {}", credentials.len(), summary.join(", "));

        Ok(credentials)
    }
}

/// Synthetic keyless credentials for simulated runs
pub struct SimulatedCredentialSource {
    count: usize,
    capacity: u32,
    refill_per_second: f64,
    max_concurrent: u32,
}

impl SimulatedCredentialSource {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            capacity: 5,
            refill_per_second: 5.0,
            max_concurrent: 2,
        }
    }

    pub fn with_limits(mut self, capacity: u32, refill_per_second: f64, max_concurrent: u32) -> Self {
        self.capacity = capacity;
        self.refill_per_second = refill_per_second;
        self.max_concurrent = max_concurrent;
        self
    }
}

#[async_trait]
impl CredentialSource for SimulatedCredentialSource {
    async fn load(&self) -> OrchestratorResult<Vec<CredentialConfig>> {
        if self.count == 0 {
            return Err(OrchestratorError::NoCredentials {
                message: "simulated mode needs at least one credential".to_string(),
            });
        }

        Ok((1..=self.count)
            .map(|n| {
                CredentialConfig::custom(
                    format!("sim-{n}"),
                    format!("simulated-key-{n}"),
                    self.capacity,
                    self.refill_per_second,
                    self.max_concurrent,
                )
            })
            .collect())
    }
}
