//! LedgerView Test Harness - Fault injection and end-to-end validation
//!
//! This crate provides:
//! - Seeded provider fault injection (failed queries, dropped feeds,
//!   duplicated and reordered deliveries, refused submissions)
//! - An in-memory `LogProvider` built on it
//! - End-to-end scenarios through the real engine runtime

pub mod chaos;
pub mod mock_log;
pub mod integration;

pub use chaos::*;
pub use mock_log::*;
pub use integration::*;
