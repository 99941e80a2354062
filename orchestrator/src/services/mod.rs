//! Service implementations
//!
//! Real implementations of the orchestrator's collaborator traits: credential
//! sources and reuse cache backends.

pub mod credentials;
pub mod file_cache;
pub mod memory_cache;

#[cfg(test)]
pub mod tests;

// Re-export all service implementations
pub use credentials::{RealCredentialSource, SimulatedCredentialSource};
pub use file_cache::FileCacheBackend;
pub use memory_cache::MemoryCacheBackend;
