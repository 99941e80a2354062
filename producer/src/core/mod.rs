//! Producer core: rate limiting, credential slots and the generation worker

pub mod pool;
pub mod rate_limiter;
pub mod slot;
pub mod worker;

pub use pool::WorkerPool;
pub use rate_limiter::RateLimiter;
pub use slot::{CredentialSlot, SlotPermit};
pub use worker::GenerationWorker;
