//! LedgerView Fetch - Historical range queries against the authoritative log
//!
//! This crate provides:
//! - Paginated range fetches presented as one logical sequence
//! - Bounded retry with exponential backoff per page
//! - Head resolution for seeding the initial window

pub mod fetcher;

pub use fetcher::*;
