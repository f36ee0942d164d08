//! Optimistic write tracker
//!
//! Keeps the local submissions that have not yet been seen confirmed by the
//! log. A confirmed entry is matched to a pending submission in two passes:
//! first by the entry id the submission provider acknowledged, then by the
//! author/payload heuristic inside the matching window. Among heuristic
//! candidates the oldest submission wins.

use std::collections::BTreeMap;
use std::time::Duration;

use ledgerview_core::{
    AuthorId, EntryId, LedgerError, LedgerResult, LogEntry, OriginId, RemoteEntry, Timestamp,
};
use tracing::debug;

/// Matching policy for speculative entries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchConfig {
    /// How long after submission a confirmation may arrive
    pub window: Duration,
    /// How far before the submission time a confirmation timestamp may fall
    pub clock_skew: Duration,
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            window: Duration::from_secs(60),
            clock_skew: Duration::from_secs(2),
        }
    }
}

/// A submission waiting for its confirmed counterpart
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingSubmission {
    pub origin: OriginId,
    pub payload: String,
    pub submitted_at: Timestamp,
    /// Entry id reported by the submission provider, if any
    pub acknowledged: Option<EntryId>,
}

impl PendingSubmission {
    fn accepts(&self, remote: &RemoteEntry, config: &MatchConfig) -> bool {
        if let Some(acked) = &self.acknowledged {
            if acked != &remote.entry_id {
                return false;
            }
        }
        self.origin.author == remote.author
            && self.payload == remote.payload
            && remote.timestamp >= self.submitted_at.saturating_sub(config.clock_skew)
            && remote.timestamp <= self.submitted_at.saturating_add(config.window)
    }
}

/// Pending local submissions, in submission order
#[derive(Debug)]
pub struct PendingTracker {
    config: MatchConfig,
    next_seq: u64,
    pending: BTreeMap<u64, PendingSubmission>,
}

impl PendingTracker {
    pub fn new(config: MatchConfig) -> Self {
        PendingTracker {
            config,
            next_seq: 1,
            pending: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_pending(&self, origin: &OriginId) -> bool {
        self.pending
            .get(&origin.seq)
            .is_some_and(|p| &p.origin == origin)
    }

    pub fn get(&self, origin: &OriginId) -> Option<&PendingSubmission> {
        self.pending.get(&origin.seq).filter(|p| &p.origin == origin)
    }

    /// Register a submission and build its speculative entry.
    ///
    /// The payload is trimmed; a blank payload is refused.
    pub fn begin(
        &mut self,
        author: AuthorId,
        payload: &str,
        now: Timestamp,
    ) -> LedgerResult<(OriginId, LogEntry)> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(LedgerError::EmptyPayload);
        }

        let origin = OriginId::new(author, self.next_seq);
        self.next_seq += 1;
        self.pending.insert(
            origin.seq,
            PendingSubmission {
                origin: origin.clone(),
                payload: payload.to_string(),
                submitted_at: now,
                acknowledged: None,
            },
        );
        let entry = LogEntry::speculative(origin.clone(), payload, now);
        Ok((origin, entry))
    }

    /// Record the entry id the submission provider reported
    pub fn acknowledge(&mut self, origin: &OriginId, entry_id: EntryId) -> bool {
        match self.pending.get_mut(&origin.seq) {
            Some(pending) if &pending.origin == origin => {
                pending.acknowledged = Some(entry_id);
                true
            }
            _ => false,
        }
    }

    /// Find and remove the submission a confirmed entry belongs to
    pub fn match_confirmed(&mut self, remote: &RemoteEntry) -> Option<OriginId> {
        let exact = self
            .pending
            .iter()
            .find(|(_, p)| p.acknowledged.as_ref() == Some(&remote.entry_id))
            .map(|(&seq, _)| seq);

        let seq = exact.or_else(|| {
            self.pending
                .iter()
                .find(|(_, p)| p.accepts(remote, &self.config))
                .map(|(&seq, _)| seq)
        })?;

        let pending = self.pending.remove(&seq)?;
        debug!(
            origin = %pending.origin,
            entry_id = %remote.entry_id,
            exact = exact.is_some(),
            "confirmed entry matched submission"
        );
        Some(pending.origin)
    }

    /// Remove a submission (rejection, expiry). `None` if already resolved.
    pub fn take(&mut self, origin: &OriginId) -> Option<PendingSubmission> {
        if !self.is_pending(origin) {
            return None;
        }
        self.pending.remove(&origin.seq)
    }

    /// Remove every submission, oldest first
    pub fn drain(&mut self) -> Vec<PendingSubmission> {
        std::mem::take(&mut self.pending).into_values().collect()
    }
}

impl Default for PendingTracker {
    fn default() -> Self {
        Self::new(MatchConfig::default())
    }
}
