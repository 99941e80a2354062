//! Core batch logic
//!
//! The dispatcher, the reuse cache, progress reporting, manifest aggregation
//! and the cost ledger. Collaborators with I/O (cache backends, credential sources,
//! generation providers) are injected through traits.

pub mod aggregator;
pub mod cache;
pub mod costs;
pub mod dispatcher;
pub mod progress;

pub use aggregator::finalize;
pub use cache::{CacheStats, Claim, DEFAULT_POLL_INTERVAL, InFlightWait, Reservation, ReuseCache, WaitOutcome};
pub use costs::CostLedger;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use progress::{ProgressReporter, ProgressStream, DEFAULT_PROGRESS_BUFFER};
