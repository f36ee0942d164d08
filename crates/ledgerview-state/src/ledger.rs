//! Reconciled ledger
//!
//! Ordered, capacity-bounded store of visible entries. Entries live in a
//! `BTreeMap` keyed by `EntryKey`, so iteration order is display order and
//! every insert is O(log n). Two side indexes resolve entry ids and
//! speculative origins to keys.
//!
//! Capacity applies to confirmed entries only. When exceeded, the oldest
//! confirmed entries are evicted and the highest evicted position becomes the
//! watermark: confirmed entries at or below it are refused from then on, so
//! a late re-delivery cannot bring an evicted entry back.

use std::collections::{BTreeMap, HashMap};

use ledgerview_core::{
    EntryId, EntryKey, LedgerError, LedgerResult, LogEntry, LogPosition, OriginId, RejectReason,
    RemoteEntry,
};
use tracing::debug;

/// Why an entry left the ledger
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemovalCause {
    /// Oldest confirmed entry pushed out by capacity
    Evicted,
    /// Speculative entry that failed to reconcile
    Rejected(RejectReason),
    /// Speculative entry whose confirmed counterpart was already visible
    Superseded,
    /// Removed on request
    Explicit,
}

/// A single visible mutation of the ledger
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerChange {
    /// A newly visible entry
    Inserted(LogEntry),
    /// A speculative entry atomically replaced by its confirmed counterpart
    Reconciled { origin: OriginId, entry: LogEntry },
    /// An entry left the ledger
    Removed { entry: LogEntry, cause: RemovalCause },
}

impl LedgerChange {
    pub fn entry(&self) -> &LogEntry {
        match self {
            LedgerChange::Inserted(entry) => entry,
            LedgerChange::Reconciled { entry, .. } => entry,
            LedgerChange::Removed { entry, .. } => entry,
        }
    }
}

/// Reference to a visible entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryRef {
    Origin(OriginId),
    Entry(EntryId),
}

/// Counts for a batch of confirmed inserts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestResult {
    pub inserted: u32,
    pub duplicates: u32,
    pub evicted: u32,
}

/// Merged, deduplicated, ordered store of log entries
#[derive(Debug)]
pub struct ReconciledLedger {
    entries: BTreeMap<EntryKey, LogEntry>,
    by_entry_id: HashMap<EntryId, EntryKey>,
    by_origin: HashMap<OriginId, EntryKey>,
    confirmed: usize,
    capacity: usize,
    watermark: Option<LogPosition>,
    version: u64,
}

impl ReconciledLedger {
    /// Create a ledger holding at most `capacity` confirmed entries
    pub fn new(capacity: usize) -> Self {
        ReconciledLedger {
            entries: BTreeMap::new(),
            by_entry_id: HashMap::new(),
            by_origin: HashMap::new(),
            confirmed: 0,
            capacity: capacity.max(1),
            watermark: None,
            version: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn confirmed_len(&self) -> usize {
        self.confirmed
    }

    pub fn speculative_len(&self) -> usize {
        self.entries.len() - self.confirmed
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Highest evicted position
    pub fn watermark(&self) -> Option<LogPosition> {
        self.watermark
    }

    /// Bumped on every visible mutation
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn contains_entry(&self, entry_id: &EntryId) -> bool {
        self.by_entry_id.contains_key(entry_id)
    }

    pub fn get(&self, target: &EntryRef) -> Option<&LogEntry> {
        let key = self.key_of(target)?;
        self.entries.get(key)
    }

    /// Entries in display order
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.values()
    }

    /// Owned copy of the entries in display order
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.values().cloned().collect()
    }

    /// Insert a speculative or confirmed entry.
    ///
    /// A confirmed entry whose id is already visible, or whose position is
    /// at or below the eviction watermark, is refused with `DuplicateEntry`.
    pub fn insert(&mut self, entry: LogEntry) -> LedgerResult<Vec<LedgerChange>> {
        if entry.is_speculative() {
            return Ok(self.insert_speculative(entry).into_iter().collect());
        }
        if !entry.is_confirmed() {
            return Ok(Vec::new());
        }
        self.check_confirmed(&entry)?;

        let mut changes = vec![LedgerChange::Inserted(entry.clone())];
        self.put(entry);
        self.evict_overflow(&mut changes);
        self.version += 1;
        Ok(changes)
    }

    /// Insert a batch of confirmed entries, absorbing duplicates
    pub fn insert_confirmed(
        &mut self,
        batch: impl IntoIterator<Item = RemoteEntry>,
    ) -> (Vec<LedgerChange>, IngestResult) {
        let mut changes = Vec::new();
        let mut result = IngestResult::default();

        for remote in batch {
            match self.insert(LogEntry::confirmed(remote)) {
                Ok(inserted) => {
                    for change in &inserted {
                        match change {
                            LedgerChange::Removed { .. } => result.evicted += 1,
                            _ => result.inserted += 1,
                        }
                    }
                    changes.extend(inserted);
                }
                Err(LedgerError::DuplicateEntry(id)) => {
                    debug!(entry_id = %id, "duplicate entry absorbed");
                    result.duplicates += 1;
                }
                Err(_) => {}
            }
        }

        (changes, result)
    }

    /// Replace the speculative entry for `origin` with its confirmed
    /// counterpart in one step.
    ///
    /// If the confirmed entry is already visible the speculative entry is
    /// retired instead. If `origin` is no longer visible the confirmed entry
    /// is inserted on its own.
    pub fn reconcile(
        &mut self,
        origin: &OriginId,
        remote: RemoteEntry,
    ) -> LedgerResult<Vec<LedgerChange>> {
        let Some(speculative) = self.take_speculative(origin) else {
            return self.insert(LogEntry::reconciled(origin.clone(), remote));
        };

        let confirmed = LogEntry::reconciled(origin.clone(), remote);
        if self.check_confirmed(&confirmed).is_err() {
            self.version += 1;
            return Ok(vec![LedgerChange::Removed {
                entry: speculative,
                cause: RemovalCause::Superseded,
            }]);
        }

        let mut changes = vec![LedgerChange::Reconciled {
            origin: origin.clone(),
            entry: confirmed.clone(),
        }];
        self.put(confirmed);
        self.evict_overflow(&mut changes);
        self.version += 1;
        Ok(changes)
    }

    /// Speculative -> Rejected, removing the entry
    pub fn reject(&mut self, origin: &OriginId, reason: RejectReason) -> Option<LedgerChange> {
        let mut entry = self.take_speculative(origin)?;
        entry.reject();
        self.version += 1;
        Some(LedgerChange::Removed {
            entry,
            cause: RemovalCause::Rejected(reason),
        })
    }

    /// Drop a speculative entry whose confirmed counterpart is already visible
    pub fn retire(&mut self, origin: &OriginId) -> Option<LedgerChange> {
        let entry = self.take_speculative(origin)?;
        self.version += 1;
        Some(LedgerChange::Removed {
            entry,
            cause: RemovalCause::Superseded,
        })
    }

    /// Remove a visible entry
    pub fn remove(&mut self, target: &EntryRef) -> Option<LedgerChange> {
        let key = self.key_of(target)?.clone();
        let entry = self.take(&key)?;
        self.version += 1;
        Some(LedgerChange::Removed {
            entry,
            cause: RemovalCause::Explicit,
        })
    }

    fn key_of(&self, target: &EntryRef) -> Option<&EntryKey> {
        match target {
            EntryRef::Origin(origin) => self.by_origin.get(origin),
            EntryRef::Entry(entry_id) => self.by_entry_id.get(entry_id),
        }
    }

    fn insert_speculative(&mut self, entry: LogEntry) -> Option<LedgerChange> {
        let origin = entry.origin()?.clone();
        if self.by_origin.contains_key(&origin) {
            debug!(%origin, "speculative entry already visible");
            return None;
        }
        let change = LedgerChange::Inserted(entry.clone());
        self.put(entry);
        self.version += 1;
        Some(change)
    }

    fn check_confirmed(&self, entry: &LogEntry) -> LedgerResult<()> {
        let (Some(entry_id), Some(position)) = (entry.entry_id(), entry.position()) else {
            return Ok(());
        };
        let below_watermark = self.watermark.is_some_and(|mark| position <= mark);
        if below_watermark || self.by_entry_id.contains_key(entry_id) {
            return Err(LedgerError::DuplicateEntry(entry_id.clone()));
        }
        Ok(())
    }

    fn put(&mut self, entry: LogEntry) {
        let key = entry.sort_key();
        if let Some(entry_id) = entry.entry_id() {
            self.by_entry_id.insert(entry_id.clone(), key.clone());
            self.confirmed += 1;
        } else if let Some(origin) = entry.origin() {
            self.by_origin.insert(origin.clone(), key.clone());
        }
        self.entries.insert(key, entry);
    }

    fn take(&mut self, key: &EntryKey) -> Option<LogEntry> {
        let entry = self.entries.remove(key)?;
        if let Some(entry_id) = entry.entry_id() {
            self.by_entry_id.remove(entry_id);
            self.confirmed -= 1;
        } else if let Some(origin) = entry.origin() {
            self.by_origin.remove(origin);
        }
        Some(entry)
    }

    fn take_speculative(&mut self, origin: &OriginId) -> Option<LogEntry> {
        let key = self.by_origin.get(origin)?.clone();
        self.take(&key)
    }

    fn evict_overflow(&mut self, changes: &mut Vec<LedgerChange>) {
        while self.confirmed > self.capacity {
            // Speculative keys sort first, so the last key is the oldest confirmed
            let Some(key) = self.entries.keys().next_back().cloned() else {
                break;
            };
            let Some(entry) = self.take(&key) else { break };
            if let Some(position) = entry.position() {
                self.watermark = Some(self.watermark.map_or(position, |mark| mark.max(position)));
            }
            debug!(position = ?entry.position(), "evicted oldest confirmed entry");
            changes.push(LedgerChange::Removed {
                entry,
                cause: RemovalCause::Evicted,
            });
        }
    }
}
