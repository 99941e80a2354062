//! Configuration types
//!
//! Credential slots, retry policy and per-batch settings. Durations are carried
//! as milliseconds so the types serialize cleanly over the submission surface.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::errors::{SharedError, SharedResult};

/// Demographic/style parameters forwarded to the generation provider
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct StyleParams {
    pub demographic: Option<String>,
    pub style: Option<String>,
    pub prompt: Option<String>,
}

/// Billing tier of a generation credential
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CredentialTier {
    /// Paid tier, 10 images per minute
    Tier1,
    /// Free tier, 2 images per minute
    Free,
    /// Limits supplied explicitly
    Custom,
}

impl CredentialTier {
    pub fn images_per_minute(&self) -> Option<u32> {
        match self {
            CredentialTier::Tier1 => Some(10),
            CredentialTier::Free => Some(2),
            CredentialTier::Custom => None,
        }
    }
}

impl fmt::Display for CredentialTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialTier::Tier1 => write!(f, "tier1"),
            CredentialTier::Free => write!(f, "free"),
            CredentialTier::Custom => write!(f, "custom"),
        }
    }
}

impl std::str::FromStr for CredentialTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tier1" | "paid" => Ok(CredentialTier::Tier1),
            "free" => Ok(CredentialTier::Free),
            "custom" => Ok(CredentialTier::Custom),
            _ => Err(format!("Unknown credential tier: {s}")),
        }
    }
}

/// One generation credential and its limiter settings
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CredentialConfig {
    pub name: String,
    #[serde(skip_serializing, default)]
    pub api_key: String,
    pub tier: CredentialTier,
    /// Token bucket capacity
    pub capacity: u32,
    /// Tokens returned to the bucket per second
    pub refill_per_second: f64,
    /// Maximum in-flight requests under this credential
    pub max_concurrent: u32,
    /// Billed price of one generated image
    #[serde(default)]
    pub cost_per_image: f64,
}

/// Provider price per generated image for tiered credentials
pub const DEFAULT_COST_PER_IMAGE: f64 = 0.04;

impl CredentialConfig {
    /// Build a credential with the limits of a known tier.
    ///
    /// Tiered keys are spaced one request per `60 / ipm + 1` seconds, which
    /// keeps a one second margin under the provider's per-minute quota.
    pub fn for_tier(name: impl Into<String>, api_key: impl Into<String>, tier: CredentialTier) -> Self {
        let refill_per_second = match tier.images_per_minute() {
            Some(ipm) => 1.0 / (60.0 / ipm as f64 + 1.0),
            None => 1.0,
        };

        Self {
            name: name.into(),
            api_key: api_key.into(),
            tier,
            capacity: 1,
            refill_per_second,
            max_concurrent: 1,
            cost_per_image: DEFAULT_COST_PER_IMAGE,
        }
    }

    /// Build a credential with explicit limits
    pub fn custom(
        name: impl Into<String>,
        api_key: impl Into<String>,
        capacity: u32,
        refill_per_second: f64,
        max_concurrent: u32,
    ) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            tier: CredentialTier::Custom,
            capacity,
            refill_per_second,
            max_concurrent,
            cost_per_image: 0.0,
        }
    }

    pub fn with_cost(mut self, cost_per_image: f64) -> Self {
        self.cost_per_image = cost_per_image;
        self
    }

    /// Time after which a spent token is returned to the bucket.
    ///
    /// `None` when the bucket never refills, including rates so small the
    /// window does not fit in a `Duration`.
    pub fn refill_window(&self) -> Option<Duration> {
        refill_window(self.capacity, self.refill_per_second)
    }

    /// API key with everything past the first six characters hidden
    pub fn masked_key(&self) -> String {
        if self.api_key.chars().count() > 6 {
            let prefix: String = self.api_key.chars().take(6).collect();
            format!("{prefix}...")
        } else {
            "***".to_string()
        }
    }

    pub fn validate(&self) -> SharedResult<()> {
        if self.name.trim().is_empty() {
            return Err(SharedError::InvalidConfig {
                field: "credential.name".to_string(),
                value: self.name.clone(),
            });
        }
        if self.capacity == 0 {
            return Err(SharedError::InvalidConfig {
                field: format!("{}.capacity", self.name),
                value: self.capacity.to_string(),
            });
        }
        if !(self.refill_per_second.is_finite() && self.refill_per_second >= 0.0) {
            return Err(SharedError::InvalidConfig {
                field: format!("{}.refill_per_second", self.name),
                value: self.refill_per_second.to_string(),
            });
        }
        if self.max_concurrent == 0 {
            return Err(SharedError::InvalidConfig {
                field: format!("{}.max_concurrent", self.name),
                value: self.max_concurrent.to_string(),
            });
        }
        if !(self.cost_per_image.is_finite() && self.cost_per_image >= 0.0) {
            return Err(SharedError::InvalidConfig {
                field: format!("{}.cost_per_image", self.name),
                value: self.cost_per_image.to_string(),
            });
        }
        Ok(())
    }
}

/// Window after which each of `capacity` tokens returns at `refill_per_second`
pub fn refill_window(capacity: u32, refill_per_second: f64) -> Option<Duration> {
    if refill_per_second > 0.0 && refill_per_second.is_finite() {
        Duration::try_from_secs_f64(capacity as f64 / refill_per_second).ok()
    } else {
        None
    }
}

/// Bounded retry with capped exponential backoff
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Provider calls allowed per item, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fractional jitter applied to each delay, 0.1 = ±10%
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after `attempts` calls have been made.
    ///
    /// `jitter_sample` must lie in `[-1.0, 1.0]`; callers pass a random value.
    pub fn delay_for(&self, attempts: u32, jitter_sample: f64) -> Duration {
        let exponent = attempts.saturating_sub(1).min(32);
        let base = self.base_delay_ms.saturating_mul(1u64 << exponent);
        let capped = base.min(self.max_delay_ms) as f64;
        let factor = 1.0 + self.jitter.clamp(0.0, 1.0) * jitter_sample.clamp(-1.0, 1.0);
        Duration::from_millis((capped * factor).round().max(0.0) as u64)
    }

    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// Settings for one batch
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BatchConfig {
    /// Variants requested for items that do not specify their own count
    pub variant_count: u32,
    /// Optional cap on in-flight items across all credentials
    pub max_concurrency: Option<usize>,
    pub retry: RetryPolicy,
    /// Per-item provider call deadline
    pub item_timeout_ms: u64,
    /// How long a worker may wait for a rate limit token
    pub acquire_timeout_ms: u64,
    /// How long to wait on another batch's in-flight generation
    pub cache_wait_timeout_ms: u64,
    pub style: StyleParams,
    /// Restrict the batch to these credential names
    pub credentials: Option<Vec<String>>,
    /// Spending cap for generated images; items that would exceed it are skipped
    pub budget: Option<f64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            variant_count: 1,
            max_concurrency: None,
            retry: RetryPolicy::default(),
            item_timeout_ms: 120_000,
            acquire_timeout_ms: 60_000,
            cache_wait_timeout_ms: 300_000,
            style: StyleParams::default(),
            credentials: None,
            budget: None,
        }
    }
}

impl BatchConfig {
    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn cache_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_wait_timeout_ms)
    }

    pub fn validate(&self) -> SharedResult<()> {
        if self.variant_count == 0 {
            return Err(SharedError::InvalidConfig {
                field: "variant_count".to_string(),
                value: "0".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(SharedError::InvalidConfig {
                field: "retry.max_attempts".to_string(),
                value: "0".to_string(),
            });
        }
        if self.max_concurrency == Some(0) {
            return Err(SharedError::InvalidConfig {
                field: "max_concurrency".to_string(),
                value: "0".to_string(),
            });
        }
        if let Some(budget) = self.budget {
            if !(budget.is_finite() && budget >= 0.0) {
                return Err(SharedError::InvalidConfig {
                    field: "budget".to_string(),
                    value: budget.to_string(),
                });
            }
        }
        if self.credentials.as_ref().is_some_and(|names| names.is_empty()) {
            return Err(SharedError::InvalidConfig {
                field: "credentials".to_string(),
                value: "[]".to_string(),
            });
        }
        Ok(())
    }
}
