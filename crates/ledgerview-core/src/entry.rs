//! Log entry model
//!
//! A `LogEntry` is either a local speculative write (identified by its
//! `OriginId`) or a confirmed record of the log (identified by `EntryId` and
//! `LogPosition`). The identity enum makes the two shapes explicit, so a
//! speculative entry can never carry a log position and a confirmed one can
//! never lack it.

use std::cmp::{Ordering, Reverse};

use serde::{Deserialize, Serialize};

use crate::{AuthorId, EntryId, LogPosition, OriginId, Timestamp};

/// Entry lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Locally originated, not yet confirmed by the log
    Speculative,
    /// Assigned a permanent position by the log
    Confirmed,
    /// Speculative entry that failed to reconcile
    Rejected,
}

impl EntryState {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryState::Speculative => "speculative",
            EntryState::Confirmed => "confirmed",
            EntryState::Rejected => "rejected",
        }
    }
}

/// Confirmed entry as delivered by the log provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub entry_id: EntryId,
    pub author: AuthorId,
    pub payload: String,
    pub position: LogPosition,
    pub timestamp: Timestamp,
}

impl RemoteEntry {
    pub fn new(
        entry_id: impl Into<EntryId>,
        author: impl Into<AuthorId>,
        payload: impl Into<String>,
        position: LogPosition,
        timestamp: Timestamp,
    ) -> Self {
        RemoteEntry {
            entry_id: entry_id.into(),
            author: author.into(),
            payload: payload.into(),
            position,
            timestamp,
        }
    }
}

/// Receipt returned by the submission provider once the log accepted a write
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub entry_id: EntryId,
    pub position: LogPosition,
    pub timestamp: Timestamp,
}

/// How an entry is identified
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryIdentity {
    /// Local submission without a log position
    Local { origin: OriginId },
    /// Recorded by the log; `origin` survives when reconciled from a local write
    Logged {
        entry_id: EntryId,
        position: LogPosition,
        origin: Option<OriginId>,
    },
}

/// The unit of record
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    identity: EntryIdentity,
    author: AuthorId,
    payload: String,
    timestamp: Timestamp,
    state: EntryState,
}

impl LogEntry {
    /// Create a speculative entry for a local submission
    pub fn speculative(origin: OriginId, payload: impl Into<String>, timestamp: Timestamp) -> Self {
        LogEntry {
            author: origin.author.clone(),
            identity: EntryIdentity::Local { origin },
            payload: payload.into(),
            timestamp,
            state: EntryState::Speculative,
        }
    }

    /// Create a confirmed entry learned from the log
    pub fn confirmed(remote: RemoteEntry) -> Self {
        LogEntry {
            identity: EntryIdentity::Logged {
                entry_id: remote.entry_id,
                position: remote.position,
                origin: None,
            },
            author: remote.author,
            payload: remote.payload,
            timestamp: remote.timestamp,
            state: EntryState::Confirmed,
        }
    }

    /// Confirmed counterpart of a local submission, keeping its origin
    pub fn reconciled(origin: OriginId, remote: RemoteEntry) -> Self {
        let mut entry = LogEntry::confirmed(remote);
        if let EntryIdentity::Logged { origin: slot, .. } = &mut entry.identity {
            *slot = Some(origin);
        }
        entry
    }

    /// Speculative -> Rejected. Returns false for any other starting state.
    pub fn reject(&mut self) -> bool {
        if self.state == EntryState::Speculative {
            self.state = EntryState::Rejected;
            true
        } else {
            false
        }
    }

    pub fn identity(&self) -> &EntryIdentity {
        &self.identity
    }

    pub fn origin(&self) -> Option<&OriginId> {
        match &self.identity {
            EntryIdentity::Local { origin } => Some(origin),
            EntryIdentity::Logged { origin, .. } => origin.as_ref(),
        }
    }

    pub fn entry_id(&self) -> Option<&EntryId> {
        match &self.identity {
            EntryIdentity::Local { .. } => None,
            EntryIdentity::Logged { entry_id, .. } => Some(entry_id),
        }
    }

    pub fn position(&self) -> Option<LogPosition> {
        match &self.identity {
            EntryIdentity::Local { .. } => None,
            EntryIdentity::Logged { position, .. } => Some(*position),
        }
    }

    pub fn author(&self) -> &AuthorId {
        &self.author
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    #[inline]
    pub fn is_speculative(&self) -> bool {
        self.state == EntryState::Speculative
    }

    #[inline]
    pub fn is_confirmed(&self) -> bool {
        self.state == EntryState::Confirmed
    }

    /// Position of this entry in the ledger's total order
    pub fn sort_key(&self) -> EntryKey {
        match &self.identity {
            EntryIdentity::Local { origin } => {
                EntryKey::Speculative(Reverse(origin.seq), origin.author.clone())
            }
            EntryIdentity::Logged {
                entry_id, position, ..
            } => EntryKey::Confirmed(Reverse(*position), entry_id.clone()),
        }
    }
}

/// Total order of the ledger, most recent first.
///
/// Variant order puts every local entry ahead of every logged one; within a
/// variant the `Reverse` wrappers give descending submission sequence and
/// descending log position. The author breaks sequence ties and the entry
/// id breaks position ties, so distinct origins never share a key.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntryKey {
    Speculative(Reverse<u64>, AuthorId),
    Confirmed(Reverse<LogPosition>, EntryId),
}

impl EntryKey {
    #[inline]
    pub fn is_confirmed(&self) -> bool {
        matches!(self, EntryKey::Confirmed(..))
    }

    pub fn position(&self) -> Option<LogPosition> {
        match self {
            EntryKey::Speculative(..) => None,
            EntryKey::Confirmed(Reverse(position), _) => Some(*position),
        }
    }
}

/// Ledger ordering: `Less` means `a` is shown before `b`
pub fn compare_entries(a: &LogEntry, b: &LogEntry) -> Ordering {
    a.sort_key().cmp(&b.sort_key())
}
