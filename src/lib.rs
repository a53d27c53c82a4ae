//! svclink – connects a service to a workflow platform over an event stream
//!
//! This crate implements the service side of the platform protocol:
//! - Per-instance schemas learned from open and aggregate events
//! - Request, consume, one-way and response handling with correlated replies
//! - Callback-backed services and script-backed services (embedded python,
//!   constraint logic programs, ansible playbooks)
//! - Outbound notifications emitted while an operation runs
//! - A WebSocket connection to the platform, and NDJSON over stdio or TCP for local use

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Adapter configuration and its on-disk form
pub mod config;
/// Demo callback service
pub mod demo;
/// Event tree model and outbound event construction
pub mod protocol;
/// Adapter core: schemas, codec, invocation and dispatch
pub mod runtime;
/// Script executors
pub mod script;
/// Connection handling
pub mod service;
/// Shared helpers
pub mod util;

// Re-export key types for convenience
pub use config::AdapterConfig;
pub use runtime::{Adapter, EventSink, Outcome};

/// Current version of svclink
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
