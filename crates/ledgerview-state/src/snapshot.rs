//! Immutable view snapshots handed to the host

use std::sync::Arc;

use ledgerview_core::{AuthorId, LogEntry, LogPosition};
use ledgerview_live::SyncStatus;
use serde::Serialize;

use crate::{
    filter_by, AggregateIndex, AggregateRecord, AggregateTotals, AuthorStanding, ReconciledLedger,
    Scope,
};

/// One coherent view of ledger and aggregate index
#[derive(Clone, Debug, Serialize)]
pub struct ViewSnapshot {
    /// Ledger version this snapshot was taken at
    pub version: u64,
    pub status: SyncStatus,
    pub cursor: Option<LogPosition>,
    /// Submissions still waiting for confirmation
    pub pending: usize,
    entries: Arc<Vec<LogEntry>>,
    aggregates: Arc<AggregateIndex>,
}

impl ViewSnapshot {
    pub fn capture(
        ledger: &ReconciledLedger,
        aggregates: &AggregateIndex,
        status: SyncStatus,
        cursor: Option<LogPosition>,
        pending: usize,
    ) -> Self {
        ViewSnapshot {
            version: ledger.version(),
            status,
            cursor,
            pending,
            entries: Arc::new(ledger.snapshot()),
            aggregates: Arc::new(aggregates.clone()),
        }
    }

    /// Snapshot of an engine that has not ingested anything
    pub fn empty(status: SyncStatus) -> Self {
        ViewSnapshot {
            version: 0,
            status,
            cursor: None,
            pending: 0,
            entries: Arc::new(Vec::new()),
            aggregates: Arc::new(AggregateIndex::default()),
        }
    }

    /// Entries, most recent first
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn filter_by(&self, scope: &Scope, search: Option<&str>) -> Vec<LogEntry> {
        filter_by(self.entries.iter(), scope, search)
    }

    pub fn aggregate(&self, author: &AuthorId) -> Option<AggregateRecord> {
        self.aggregates.get(author)
    }

    pub fn top_authors(&self, k: usize) -> Vec<AuthorStanding> {
        self.aggregates.top(k)
    }

    pub fn totals(&self) -> AggregateTotals {
        self.aggregates.totals()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerview_core::{RemoteEntry, Timestamp};

    #[test]
    fn test_capture_is_detached_from_ledger() {
        let mut ledger = ReconciledLedger::new(10);
        let mut index = AggregateIndex::new();
        let remote = RemoteEntry::new(
            "e1",
            "0xa",
            "gm",
            LogPosition::new(1),
            Timestamp::from_secs(1),
        );
        for change in ledger.insert(LogEntry::confirmed(remote)).unwrap() {
            index.apply(&change);
        }

        let snapshot = ViewSnapshot::capture(
            &ledger,
            &index,
            SyncStatus::Live,
            Some(LogPosition::new(1)),
            0,
        );
        ledger.remove(&crate::EntryRef::Entry("e1".into()));
        index.reset();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.aggregate(&AuthorId::new("0xA")).map(|r| r.count), Some(1));
        assert_eq!(snapshot.totals().unique_authors, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let snapshot = ViewSnapshot::empty(SyncStatus::Seeding);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "seeding");
        assert_eq!(json["entries"], serde_json::json!([]));
    }
}
