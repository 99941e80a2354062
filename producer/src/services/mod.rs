//! Generation provider implementations

pub mod http_provider;
pub mod simulated_provider;

#[cfg(test)]
pub mod tests;

pub use http_provider::*;
pub use simulated_provider::*;
