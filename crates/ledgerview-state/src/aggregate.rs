//! Per-author aggregate index

use std::cmp::Reverse;
use std::collections::HashMap;

use ledgerview_core::{AuthorId, Timestamp};
use serde::Serialize;

use crate::LedgerChange;

/// Statistics for one author
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct AggregateRecord {
    pub count: u64,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
}

impl AggregateRecord {
    fn new(at: Timestamp) -> Self {
        AggregateRecord {
            count: 0,
            first_seen: at,
            last_seen: at,
        }
    }

    fn touch(&mut self, at: Timestamp) {
        self.first_seen = self.first_seen.min(at);
        self.last_seen = self.last_seen.max(at);
    }
}

/// An author and their record, as ranked by `top`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthorStanding {
    pub author: AuthorId,
    #[serde(flatten)]
    pub record: AggregateRecord,
}

/// Index-wide totals
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AggregateTotals {
    pub total_entries: u64,
    pub unique_authors: usize,
    pub last_activity: Option<Timestamp>,
}

/// Incrementally maintained author statistics.
///
/// Counts only ever grow: eviction and rejection leave them alone, and a
/// reconciliation is the same logical entry as the speculative one it
/// replaces. Only `reset` clears them.
#[derive(Clone, Debug, Default, Serialize)]
pub struct AggregateIndex {
    records: HashMap<AuthorId, AggregateRecord>,
    total_entries: u64,
    last_activity: Option<Timestamp>,
}

impl AggregateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one ledger change into the index
    pub fn apply(&mut self, change: &LedgerChange) {
        match change {
            LedgerChange::Inserted(entry) => {
                let at = entry.timestamp();
                let record = self
                    .records
                    .entry(entry.author().clone())
                    .or_insert_with(|| AggregateRecord::new(at));
                record.count += 1;
                record.touch(at);
                self.total_entries += 1;
                self.note_activity(at);
            }
            LedgerChange::Reconciled { entry, .. } => {
                let at = entry.timestamp();
                match self.records.get_mut(entry.author()) {
                    Some(record) => record.last_seen = record.last_seen.max(at),
                    None => {
                        // Index was reset while the submission was pending
                        let mut record = AggregateRecord::new(at);
                        record.count = 1;
                        self.records.insert(entry.author().clone(), record);
                        self.total_entries += 1;
                    }
                }
                self.note_activity(at);
            }
            LedgerChange::Removed { .. } => {}
        }
    }

    pub fn get(&self, author: &AuthorId) -> Option<AggregateRecord> {
        self.records.get(author).copied()
    }

    /// Top `k` authors by count; ties go to the earliest first_seen, then
    /// the author key
    pub fn top(&self, k: usize) -> Vec<AuthorStanding> {
        let mut ranked: Vec<AuthorStanding> = self
            .records
            .iter()
            .map(|(author, record)| AuthorStanding {
                author: author.clone(),
                record: *record,
            })
            .collect();
        ranked.sort_by_key(|s| (Reverse(s.record.count), s.record.first_seen, s.author.clone()));
        ranked.truncate(k);
        ranked
    }

    pub fn totals(&self) -> AggregateTotals {
        AggregateTotals {
            total_entries: self.total_entries,
            unique_authors: self.records.len(),
            last_activity: self.last_activity,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn reset(&mut self) {
        self.records.clear();
        self.total_entries = 0;
        self.last_activity = None;
    }

    fn note_activity(&mut self, at: Timestamp) {
        self.last_activity = Some(self.last_activity.map_or(at, |last| last.max(at)));
    }
}
