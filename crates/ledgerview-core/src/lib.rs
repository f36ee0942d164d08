//! LedgerView Core - Log entry model and shared primitives
//!
//! This crate defines the types shared by every reconciliation layer:
//! - Identifiers (AuthorId, EntryId, LogPosition, OriginId)
//! - Logical timestamps
//! - Log entries, their lifecycle state and ledger ordering
//! - The log provider contract
//! - Retry/backoff policy
//! - Error taxonomy

pub mod id;
pub mod time;
pub mod entry;
pub mod provider;
pub mod retry;
pub mod error;

pub use id::*;
pub use time::*;
pub use entry::*;
pub use provider::*;
pub use retry::*;
pub use error::*;
