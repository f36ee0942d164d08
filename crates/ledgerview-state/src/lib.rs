//! LedgerView State - Reconciled ledger and derived views
//!
//! This crate implements the engine-owned state:
//! - Reconciled ledger (dedup, ordering, capacity eviction)
//! - Optimistic write tracker (speculative entries, matching policy)
//! - Aggregate index (per-author statistics, totals, ranking)
//! - Query view (scope and search filters)
//! - Immutable snapshots for the host

pub mod ledger;
pub mod pending;
pub mod aggregate;
pub mod query;
pub mod snapshot;

pub use ledger::*;
pub use pending::*;
pub use aggregate::*;
pub use query::*;
pub use snapshot::*;
