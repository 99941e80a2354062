//! Trait definitions with mockall annotations for testing
//!
//! The credential source and the reuse cache backend are the two external
//! collaborators of the orchestrator; both are injected behind these traits.

use async_trait::async_trait;

use shared::{CacheEntry, CredentialConfig, SourceIdentity};
use crate::error::OrchestratorResult;

/// Result of a point lookup against a cache backend
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup {
    Missing,
    Found(CacheEntry),
    /// A record exists but was never fully written
    Incomplete,
}

/// Credential source abstraction for dependency injection
#[mockall::automock]
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Load every configured generation credential
    async fn load(&self) -> OrchestratorResult<Vec<CredentialConfig>>;
}

/// Durable store behind the reuse cache.
///
/// Entries are append-only: `append` adds references to an identity's entry
/// and never removes or replaces existing ones. Reservations are the store's
/// atomic conditional insert: at most one owner holds an identity at a time,
/// across every handle on the same store.
#[mockall::automock]
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Point lookup by identity
    async fn load(&self, identity: &SourceIdentity) -> OrchestratorResult<CacheLookup>;

    /// Append references generated with `method`; returns the resulting entry
    async fn append(&self, identity: &SourceIdentity, references: &[String], method: &str) -> OrchestratorResult<CacheEntry>;

    /// Every complete entry in the store
    async fn scan(&self) -> OrchestratorResult<Vec<CacheEntry>>;

    /// Reserve `identity` for `owner`; false when another owner holds it
    async fn try_reserve(&self, identity: &SourceIdentity, owner: &str) -> OrchestratorResult<bool>;

    /// Drop `owner`'s reservation. A reservation held by someone else is left alone.
    async fn release(&self, identity: &SourceIdentity, owner: &str) -> OrchestratorResult<()>;

    /// Whether any owner currently holds `identity`
    async fn is_reserved(&self, identity: &SourceIdentity) -> OrchestratorResult<bool>;
}
