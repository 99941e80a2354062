//! In-memory reuse cache backend

use std::collections::HashMap;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use shared::{CacheEntry, SourceIdentity};
use crate::error::OrchestratorResult;
use crate::traits::{CacheBackend, CacheLookup};

/// Cache backend holding entries in a map; lives as long as the process
#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: RwLock<HashMap<SourceIdentity, CacheEntry>>,
    /// Identity to reservation owner
    reservations: RwLock<HashMap<SourceIdentity, String>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record exactly as given, including incomplete ones
    pub async fn seed(&self, entry: CacheEntry) {
        self.entries.write().await.insert(entry.identity.clone(), entry);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn reserved(&self) -> usize {
        self.reservations.read().await.len()
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn load(&self, identity: &SourceIdentity) -> OrchestratorResult<CacheLookup> {
        let entries = self.entries.read().await;
        Ok(match entries.get(identity) {
            Some(entry) if entry.complete => CacheLookup::Found(entry.clone()),
            Some(_) => CacheLookup::Incomplete,
            None => CacheLookup::Missing,
        })
    }

    async fn append(&self, identity: &SourceIdentity, references: &[String], method: &str) -> OrchestratorResult<CacheEntry> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .entry(identity.clone())
            .or_insert_with(|| CacheEntry::new(identity.clone()));
        if !entry.complete {
            // A partial record is never read, so it is replaced rather than extended
            *entry = CacheEntry::new(identity.clone());
        }
        entry.append(references, method, Utc::now());
        Ok(entry.clone())
    }

    async fn scan(&self) -> OrchestratorResult<Vec<CacheEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.values().filter(|entry| entry.complete).cloned().collect())
    }

    async fn try_reserve(&self, identity: &SourceIdentity, owner: &str) -> OrchestratorResult<bool> {
        let mut reservations = self.reservations.write().await;
        if reservations.contains_key(identity) {
            return Ok(false);
        }
        reservations.insert(identity.clone(), owner.to_string());
        Ok(true)
    }

    async fn release(&self, identity: &SourceIdentity, owner: &str) -> OrchestratorResult<()> {
        let mut reservations = self.reservations.write().await;
        if reservations.get(identity).is_some_and(|holder| holder == owner) {
            reservations.remove(identity);
        }
        Ok(())
    }

    async fn is_reserved(&self, identity: &SourceIdentity) -> OrchestratorResult<bool> {
        Ok(self.reservations.read().await.contains_key(identity))
    }
}
