//! Live subscriber
//!
//! Synchronous state machine behind the push feed. It owns the ingestion
//! cursor and decides, for every delivery, whether the entry can be accepted
//! now, is a duplicate, or must be held until a backfill closes the gap in
//! front of it. It never performs I/O: backfills and head probes are handed
//! back to the caller as requests, and their completions are fed back in.
//!
//! A completion is only applied if the request is still the one in flight and
//! the cursor has not moved since it was issued; anything else is stale.

use std::collections::BTreeMap;

use ledgerview_core::{LedgerError, LedgerResult, LogPosition, RemoteEntry};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{Arrival, Cursor};

/// Synchronisation phase exposed to the host
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Initial window not loaded yet
    Seeding,
    /// Cursor is current, deliveries are accepted directly
    Live,
    /// A gap is being closed; later deliveries are held
    Backfilling,
    /// A fetch exhausted its retries; waiting for the host to retry
    Stalled,
    /// Push connection lost; the feed pump is reconnecting
    Disconnected,
}

impl SyncStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncStatus::Seeding => "seeding",
            SyncStatus::Live => "live",
            SyncStatus::Backfilling => "backfilling",
            SyncStatus::Stalled => "stalled",
            SyncStatus::Disconnected => "disconnected",
        }
    }
}

/// Live subscriber configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriberConfig {
    /// Positions loaded behind the head at startup
    pub lookback: u64,
    /// Maximum deliveries held while a gap is open
    pub max_held: usize,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        SubscriberConfig {
            lookback: 1000,
            max_held: 1024,
        }
    }
}

/// Range fetch needed to close a gap in front of the cursor
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackfillRequest {
    pub start: LogPosition,
    pub end: LogPosition,
    /// Cursor at request time, checked again on completion
    pub from_cursor: LogPosition,
}

/// I/O the subscriber needs performed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncStep {
    ResolveHead,
    Backfill(BackfillRequest),
}

/// Result of a single delivery
#[derive(Debug)]
pub enum FeedAction {
    /// Entries now contiguous with the cursor, in log order
    Accept(Vec<RemoteEntry>),
    /// Already ingested or already held
    Absorbed,
    /// Held until the gap in front of it closes
    Held,
    /// Held buffer full; recovered by a later backfill
    Dropped,
    /// Held, and the gap in front of it must be fetched
    Backfill(BackfillRequest),
}

/// Result of a head probe or backfill completion
#[derive(Debug)]
pub enum SyncOutcome {
    /// Entries to ingest in log order, plus a follow-up fetch if a gap remains
    Advanced {
        entries: Vec<RemoteEntry>,
        next: Option<BackfillRequest>,
    },
    /// Completion no longer matches the cursor
    Stale,
    /// The step failed; `retry` re-issues it
    Stalled(LedgerError),
}

/// Cursor, held buffer and backfill bookkeeping for one log
#[derive(Debug)]
pub struct LiveSubscriber {
    config: SubscriberConfig,
    cursor: Option<Cursor>,
    seeded: bool,
    connected: bool,
    held: BTreeMap<LogPosition, RemoteEntry>,
    /// Highest position known to exist
    seen_high: LogPosition,
    in_flight: Option<BackfillRequest>,
    failed: Option<SyncStep>,
    dropped: u64,
}

impl LiveSubscriber {
    pub fn new(config: SubscriberConfig) -> Self {
        LiveSubscriber {
            config,
            cursor: None,
            seeded: false,
            connected: false,
            held: BTreeMap::new(),
            seen_high: LogPosition::ZERO,
            in_flight: None,
            failed: None,
            dropped: 0,
        }
    }

    pub fn status(&self) -> SyncStatus {
        if self.failed.is_some() {
            SyncStatus::Stalled
        } else if !self.seeded {
            SyncStatus::Seeding
        } else if !self.connected {
            SyncStatus::Disconnected
        } else if self.in_flight.is_some() {
            SyncStatus::Backfilling
        } else {
            SyncStatus::Live
        }
    }

    /// Contiguously ingested position, `None` until the head is known
    pub fn cursor(&self) -> Option<LogPosition> {
        self.cursor.map(|c| c.position())
    }

    pub fn in_flight(&self) -> Option<BackfillRequest> {
        self.in_flight
    }

    pub fn held_len(&self) -> usize {
        self.held.len()
    }

    /// Deliveries dropped because the held buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Handle one push delivery
    pub fn on_entry(&mut self, entry: RemoteEntry) -> FeedAction {
        let position = entry.position;
        self.seen_high = self.seen_high.max(position);

        let Some(cursor) = self.cursor else {
            return self.hold(entry);
        };

        let arrival = cursor.classify(position);
        if arrival == Arrival::Duplicate {
            debug!(%position, "duplicate delivery absorbed");
            return FeedAction::Absorbed;
        }
        if !self.seeded || self.in_flight.is_some() || self.failed.is_some() {
            return self.hold(entry);
        }

        match arrival {
            Arrival::Next => {
                self.advance(position);
                let mut entries = vec![entry];
                entries.extend(self.release());
                FeedAction::Accept(entries)
            }
            Arrival::Gap {
                missing_start,
                missing_end,
            } => {
                if let FeedAction::Dropped = self.hold(entry) {
                    return FeedAction::Dropped;
                }
                let request = BackfillRequest {
                    start: missing_start,
                    end: missing_end,
                    from_cursor: cursor.position(),
                };
                info!(
                    start = %request.start,
                    end = %request.end,
                    "position gap, backfilling"
                );
                self.in_flight = Some(request);
                FeedAction::Backfill(request)
            }
            Arrival::Duplicate => FeedAction::Absorbed,
        }
    }

    /// Apply a head probe result. The first one fixes the seed window.
    pub fn on_head(&mut self, head: LedgerResult<Option<LogPosition>>) -> SyncOutcome {
        let head = match head {
            Ok(head) => head,
            Err(err) => {
                warn!(error = %err, "head lookup failed, sync stalled");
                self.failed = Some(SyncStep::ResolveHead);
                return SyncOutcome::Stalled(err);
            }
        };
        if self.failed.is_some() {
            return SyncOutcome::Stale;
        }
        if let Some(head) = head {
            self.seen_high = self.seen_high.max(head);
        }

        if self.cursor.is_none() {
            let baseline = match head {
                Some(head) => {
                    let start = head
                        .value()
                        .saturating_sub(self.config.lookback.saturating_sub(1))
                        .max(1);
                    LogPosition::new(start - 1)
                }
                None => LogPosition::ZERO,
            };
            info!(head = ?head, %baseline, "seeding from log head");
            self.cursor = Some(Cursor::new(baseline));
        } else if self.in_flight.is_some() {
            return SyncOutcome::Advanced {
                entries: Vec::new(),
                next: None,
            };
        }

        let (entries, next) = self.settle();
        if next.is_none() {
            self.seeded = true;
        }
        SyncOutcome::Advanced { entries, next }
    }

    /// Apply a backfill completion
    pub fn on_backfill(
        &mut self,
        request: BackfillRequest,
        result: LedgerResult<Vec<RemoteEntry>>,
    ) -> SyncOutcome {
        if self.in_flight != Some(request) || self.cursor() != Some(request.from_cursor) {
            debug!(start = %request.start, end = %request.end, "stale backfill discarded");
            return SyncOutcome::Stale;
        }
        self.in_flight = None;

        let mut entries = match result {
            Ok(entries) => entries,
            Err(err) => {
                warn!(
                    start = %request.start,
                    end = %request.end,
                    error = %err,
                    "backfill failed, sync stalled"
                );
                self.failed = Some(SyncStep::Backfill(request));
                return SyncOutcome::Stalled(err);
            }
        };
        entries.retain(|e| e.position >= request.start && e.position <= request.end);

        // Held deliveries inside the range survive if the fetch lagged behind them
        let above = self.held.split_off(&request.end.next());
        let covered = std::mem::replace(&mut self.held, above);
        for (position, entry) in covered {
            if position >= request.start && !entries.iter().any(|e| e.position == position) {
                entries.push(entry);
            }
        }
        entries.sort_by_key(|e| e.position);

        self.advance(request.end);
        self.seeded = true;
        debug!(
            cursor = %request.end,
            merged = entries.len(),
            "backfill merged"
        );

        let (released, next) = self.settle();
        entries.extend(released);
        SyncOutcome::Advanced { entries, next }
    }

    pub fn on_disconnect(&mut self) {
        if self.connected {
            warn!(cursor = ?self.cursor(), "live subscription dropped");
        }
        self.connected = false;
    }

    /// Push connection (re)established. Returns a head probe once the cursor
    /// is known, so anything confirmed while disconnected is backfilled.
    pub fn on_connected(&mut self) -> Option<SyncStep> {
        self.connected = true;
        if self.cursor.is_some() && self.failed.is_none() {
            Some(SyncStep::ResolveHead)
        } else {
            None
        }
    }

    /// Re-issue the step that stalled sync
    pub fn retry(&mut self) -> Option<SyncStep> {
        match self.failed.take()? {
            SyncStep::ResolveHead => Some(SyncStep::ResolveHead),
            SyncStep::Backfill(_) => self.plan_backfill().map(SyncStep::Backfill),
        }
    }

    fn advance(&mut self, position: LogPosition) {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.advance_to(position);
        }
    }

    fn hold(&mut self, entry: RemoteEntry) -> FeedAction {
        let position = entry.position;
        if self.held.contains_key(&position) {
            return FeedAction::Absorbed;
        }
        if self.held.len() >= self.config.max_held.max(1) {
            self.dropped += 1;
            warn!(%position, held = self.held.len(), "held buffer full, delivery dropped");
            return FeedAction::Dropped;
        }
        debug!(%position, "delivery held");
        self.held.insert(position, entry);
        FeedAction::Held
    }

    /// Pop held entries that are now duplicates or contiguous with the cursor
    fn release(&mut self) -> Vec<RemoteEntry> {
        let mut released = Vec::new();
        while let Some((&position, _)) = self.held.first_key_value() {
            let Some(cursor) = self.cursor else { break };
            match cursor.classify(position) {
                Arrival::Duplicate => {
                    self.held.pop_first();
                }
                Arrival::Next => {
                    if let Some((_, entry)) = self.held.pop_first() {
                        self.advance(position);
                        released.push(entry);
                    }
                }
                Arrival::Gap { .. } => break,
            }
        }
        released
    }

    fn settle(&mut self) -> (Vec<RemoteEntry>, Option<BackfillRequest>) {
        let released = self.release();
        let next = self.plan_backfill();
        (released, next)
    }

    fn plan_backfill(&mut self) -> Option<BackfillRequest> {
        if self.in_flight.is_some() || self.failed.is_some() {
            return None;
        }
        let cursor = self.cursor?.position();
        let end = match self.held.first_key_value() {
            Some((&first, _)) => first.prev()?,
            None => self.seen_high,
        };
        if end <= cursor {
            return None;
        }
        let request = BackfillRequest {
            start: cursor.next(),
            end,
            from_cursor: cursor,
        };
        self.in_flight = Some(request);
        Some(request)
    }
}
