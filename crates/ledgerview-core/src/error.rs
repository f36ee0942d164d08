//! Error types for ledger reconciliation

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::{EntryId, LogPosition, OriginId};

/// What a failed fetch was asking for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchTarget {
    /// Latest position of the log
    Head,
    /// Inclusive position range
    Range { start: LogPosition, end: LogPosition },
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchTarget::Head => f.write_str("log head"),
            FetchTarget::Range { start, end } => write!(f, "positions {start}..={end}"),
        }
    }
}

/// Why a speculative entry was rejected
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    /// No confirmation arrived inside the matching window
    Timeout,
    /// The submission provider reported a failure
    Provider(String),
    /// The engine was torn down while the submission was pending
    Cancelled,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Timeout => f.write_str("not confirmed within the matching window"),
            RejectReason::Provider(msg) => write!(f, "provider failure: {msg}"),
            RejectReason::Cancelled => f.write_str("engine shut down"),
        }
    }
}

/// Opaque failure reported by a log provider
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[error("{0}")]
pub struct ProviderError(pub String);

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        ProviderError(message.into())
    }
}

/// Ledger reconciliation errors
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum LedgerError {
    #[error("fetch of {target} failed after {attempts} attempts: {reason}")]
    FetchFailure {
        target: FetchTarget,
        attempts: u32,
        reason: String,
    },

    #[error("live subscription dropped")]
    SubscriptionDropped,

    #[error("submission {origin} rejected: {reason}")]
    SubmissionRejected {
        origin: OriginId,
        reason: RejectReason,
    },

    #[error("duplicate entry {0}")]
    DuplicateEntry(EntryId),

    #[error("position gap: expected {expected}, got {actual}")]
    PositionGap {
        expected: LogPosition,
        actual: LogPosition,
    },

    #[error("invalid range {start}..={end}")]
    InvalidRange { start: LogPosition, end: LogPosition },

    #[error("payload is empty")]
    EmptyPayload,

    #[error("engine is closed")]
    EngineClosed,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl LedgerError {
    /// Failures that only the host can act on
    pub fn is_surfaced(&self) -> bool {
        matches!(
            self,
            LedgerError::FetchFailure { .. }
                | LedgerError::SubmissionRejected { .. }
                | LedgerError::EngineClosed
                | LedgerError::Config(_)
        )
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;
