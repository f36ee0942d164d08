//! Identity types for log entries
//!
//! `EntryId` and `LogPosition` are assigned by the authoritative log.
//! `OriginId` is minted locally at submission time and never leaves the
//! process. Author keys are account addresses and compare case-insensitively.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Author identity - account address, normalised to lowercase
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct AuthorId(String);

impl AuthorId {
    pub fn new(id: impl AsRef<str>) -> Self {
        AuthorId(id.as_ref().trim().to_ascii_lowercase())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form, `0x1234...abcd` for anything longer than ten chars
    pub fn short(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        if chars.len() <= 10 {
            return self.0.clone();
        }
        let head: String = chars[..6].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    }
}

impl From<String> for AuthorId {
    fn from(id: String) -> Self {
        AuthorId::new(id)
    }
}

impl From<&str> for AuthorId {
    fn from(id: &str) -> Self {
        AuthorId::new(id)
    }
}

impl From<AuthorId> for String {
    fn from(id: AuthorId) -> Self {
        id.0
    }
}

impl fmt::Debug for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Author({})", self.0)
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authoritative entry identity (e.g. transaction hash + log index)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        EntryId(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EntryId {
    fn from(id: String) -> Self {
        EntryId::new(id)
    }
}

impl From<&str> for EntryId {
    fn from(id: &str) -> Self {
        EntryId::new(id)
    }
}

impl fmt::Debug for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Entry({})", self.0)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position of a confirmed entry in the authoritative log
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogPosition(pub u64);

impl LogPosition {
    pub const ZERO: LogPosition = LogPosition(0);

    #[inline]
    pub fn new(position: u64) -> Self {
        LogPosition(position)
    }

    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn next(self) -> Self {
        LogPosition(self.0.saturating_add(1))
    }

    #[inline]
    pub fn prev(self) -> Option<Self> {
        self.0.checked_sub(1).map(LogPosition)
    }
}

impl fmt::Debug for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pos({})", self.0)
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local submission identity: author key plus a process-wide monotonic counter
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OriginId {
    pub author: AuthorId,
    pub seq: u64,
}

impl OriginId {
    #[inline]
    pub fn new(author: AuthorId, seq: u64) -> Self {
        OriginId { author, seq }
    }
}

impl fmt::Debug for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Origin({}:{})", self.author.0, self.seq)
    }
}

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.author.0, self.seq)
    }
}
