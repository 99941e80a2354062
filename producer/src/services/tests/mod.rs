//! Tests for the generation provider implementations
//!
//! The HTTP provider is exercised against a wiremock server; the simulated
//! provider runs against a paused clock.

pub mod http_provider;
