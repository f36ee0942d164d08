//! LedgerView Live - Push feed of newly confirmed entries
//!
//! This crate provides:
//! - Contiguous ingestion cursor with gap classification
//! - Live subscriber state machine (held entries, backfill planning, sync status)
//! - Feed pump owning the provider subscription, with reconnect backoff

pub mod cursor;
pub mod subscriber;
pub mod pump;

pub use cursor::*;
pub use subscriber::*;
pub use pump::*;
