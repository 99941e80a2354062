//! Webserver library for the batch enhancement system
//!
//! Exposes the batch service over HTTP: submit batches, query status, request
//! stops, fetch manifests, and stream progress snapshots over WebSockets.

pub mod error;
pub mod state;
pub mod web;
pub mod webserver_impl;

// Re-export main types
pub use error::{WebServerError, WebServerResult};
pub use state::WebServerState;
pub use webserver_impl::WebServer;
