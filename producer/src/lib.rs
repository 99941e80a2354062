//! Producer library for the image enhancement system
//!
//! Rate-limited credential slots and the generation workers that issue
//! requests to an external image generation provider under them.

pub mod core;
pub mod error;
pub mod services;
pub mod traits;
pub mod types;

// Re-export main types
pub use crate::core::{CredentialSlot, GenerationWorker, RateLimiter, SlotPermit, WorkerPool};
pub use error::{ProducerError, ProducerResult};
pub use services::*;
pub use traits::*;
pub use types::*;
