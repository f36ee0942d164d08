//! LedgerView Runtime - Engine orchestration and host handle
//!
//! This crate ties the layers together:
//! 1. Resolve the log head and seed the initial window
//! 2. Follow the push feed, backfilling gaps
//! 3. Insert speculative entries for local submissions
//! 4. Reconcile confirmations, reject timeouts and provider failures
//! 5. Maintain per-author aggregates
//! 6. Publish immutable snapshots to the host
//!
//! It also carries the engine configuration and tracing setup.

pub mod config;
pub mod telemetry;
pub mod engine;
pub mod runtime;

pub use config::*;
pub use telemetry::*;
pub use engine::*;
pub use runtime::*;
