//! Running generation spend across batches

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Images and spend over some period
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub images: u64,
    pub cost: f64,
}

impl UsageTotals {
    pub fn add(&mut self, images: u64, cost: f64) {
        self.images += images;
        self.cost += cost;
    }
}

/// Spend of every finished batch, bucketed by UTC day and month
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub batches: u64,
    pub total: UsageTotals,
    /// Keyed by `YYYY-MM-DD`
    pub daily: BTreeMap<String, UsageTotals>,
    /// Keyed by `YYYY-MM`
    pub monthly: BTreeMap<String, UsageTotals>,
}

impl CostSummary {
    pub fn record(&mut self, images: u64, cost: f64, at: DateTime<Utc>) {
        self.batches += 1;
        self.total.add(images, cost);
        self.daily.entry(at.format("%Y-%m-%d").to_string()).or_default().add(images, cost);
        self.monthly.entry(at.format("%Y-%m").to_string()).or_default().add(images, cost);
    }

    pub fn day(&self, at: DateTime<Utc>) -> UsageTotals {
        self.daily.get(&at.format("%Y-%m-%d").to_string()).copied().unwrap_or_default()
    }

    pub fn month(&self, at: DateTime<Utc>) -> UsageTotals {
        self.monthly.get(&at.format("%Y-%m").to_string()).copied().unwrap_or_default()
    }
}
