//! Engine state machine
//!
//! The engine owns the ledger, the aggregate index, the pending tracker and
//! the live subscriber. It is purely synchronous: the driver feeds it one
//! `Input` at a time and carries out the `Effect`s it returns (fetches,
//! submissions, timers, publication). Every input runs to completion before
//! the next one is handled, so all mutations happen on one logical thread.

use std::time::Duration;

use ledgerview_core::{
    AuthorId, EntryId, LedgerError, LedgerResult, LogEntry, LogPosition, OriginId, ProviderError,
    RejectReason, RemoteEntry, SubmitReceipt, Timestamp,
};
use ledgerview_live::{
    BackfillRequest, FeedAction, FeedEvent, LiveSubscriber, SyncOutcome, SyncStatus, SyncStep,
};
use ledgerview_state::{
    AggregateIndex, EntryRef, LedgerChange, PendingTracker, ReconciledLedger, ViewSnapshot,
};
use tracing::{debug, info, warn};

use crate::EngineConfig;

/// Delivery or completion handed to the engine
#[derive(Debug)]
pub enum Input {
    Feed(FeedEvent),
    HeadResolved(LedgerResult<Option<LogPosition>>),
    BackfillDone {
        request: BackfillRequest,
        result: LedgerResult<Vec<RemoteEntry>>,
    },
    SubmitAcked {
        origin: OriginId,
        result: Result<SubmitReceipt, ProviderError>,
    },
    TimerExpired(OriginId),
}

impl From<FeedEvent> for Input {
    fn from(event: FeedEvent) -> Self {
        Input::Feed(event)
    }
}

/// Work the driver performs on the engine's behalf
#[derive(Debug)]
pub enum Effect {
    ResolveHead,
    Backfill(BackfillRequest),
    Submit {
        origin: OriginId,
        author: AuthorId,
        payload: String,
    },
    ArmTimer {
        origin: OriginId,
        after: Duration,
    },
    CancelTimer(OriginId),
    /// Resolve the submission's pending handle
    Settle {
        origin: OriginId,
        outcome: LedgerResult<EntryId>,
    },
    Publish(ViewSnapshot),
    Fault(LedgerError),
}

#[derive(Clone, Debug, Default)]
pub struct EngineStats {
    pub inputs: u64,
    pub ingested: u64,
    pub duplicates: u64,
    pub backfills: u64,
    pub reconciled: u64,
    pub rejected: u64,
    pub faults: u64,
}

/// Single-threaded reconciliation engine
pub struct Engine {
    config: EngineConfig,
    ledger: ReconciledLedger,
    aggregates: AggregateIndex,
    tracker: PendingTracker,
    subscriber: LiveSubscriber,
    stats: EngineStats,
    /// (ledger version, status, pending) at the last publication
    published: (u64, SyncStatus, usize),
    closed: bool,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let subscriber = LiveSubscriber::new(config.subscriber_config());
        let published = (0, subscriber.status(), 0);
        Engine {
            ledger: ReconciledLedger::new(config.capacity),
            aggregates: AggregateIndex::new(),
            tracker: PendingTracker::new(config.match_config()),
            subscriber,
            stats: EngineStats::default(),
            published,
            closed: false,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &ReconciledLedger {
        &self.ledger
    }

    pub fn aggregates(&self) -> &AggregateIndex {
        &self.aggregates
    }

    pub fn status(&self) -> SyncStatus {
        self.subscriber.status()
    }

    pub fn cursor(&self) -> Option<LogPosition> {
        self.subscriber.cursor()
    }

    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn snapshot(&self) -> ViewSnapshot {
        ViewSnapshot::capture(
            &self.ledger,
            &self.aggregates,
            self.subscriber.status(),
            self.subscriber.cursor(),
            self.tracker.len(),
        )
    }

    /// First effects after start: resolve the head to seed from
    pub fn start(&mut self) -> Vec<Effect> {
        info!(topic = %self.config.topic, capacity = self.config.capacity, "engine starting");
        vec![Effect::ResolveHead]
    }

    /// Process one input
    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        if self.closed {
            return Vec::new();
        }
        self.stats.inputs += 1;
        let mut effects = Vec::new();

        match input {
            Input::Feed(FeedEvent::Connected) => {
                if let Some(step) = self.subscriber.on_connected() {
                    self.push_step(step, &mut effects);
                }
            }
            Input::Feed(FeedEvent::Disconnected) => self.subscriber.on_disconnect(),
            Input::Feed(FeedEvent::Entry(remote)) => match self.subscriber.on_entry(remote) {
                FeedAction::Accept(entries) => self.ingest(entries, &mut effects),
                FeedAction::Backfill(request) => {
                    self.push_step(SyncStep::Backfill(request), &mut effects)
                }
                FeedAction::Absorbed => self.stats.duplicates += 1,
                FeedAction::Held | FeedAction::Dropped => {}
            },
            Input::HeadResolved(result) => {
                let outcome = self.subscriber.on_head(result);
                self.apply_outcome(outcome, &mut effects);
            }
            Input::BackfillDone { request, result } => {
                let outcome = self.subscriber.on_backfill(request, result);
                self.apply_outcome(outcome, &mut effects);
            }
            Input::SubmitAcked { origin, result } => self.on_submit_ack(origin, result, &mut effects),
            Input::TimerExpired(origin) => {
                if self.tracker.is_pending(&origin) {
                    self.reject(origin, RejectReason::Timeout, &mut effects);
                } else {
                    debug!(%origin, "late expiry ignored");
                }
            }
        }

        self.publish_if_changed(&mut effects);
        effects
    }

    /// Insert a speculative entry for a local submission
    pub fn submit(
        &mut self,
        author: AuthorId,
        payload: &str,
        now: Timestamp,
    ) -> LedgerResult<(OriginId, Vec<Effect>)> {
        if self.closed {
            return Err(LedgerError::EngineClosed);
        }
        let (origin, entry) = self.tracker.begin(author, payload, now)?;
        let payload = entry.payload().to_string();
        let changes = self.ledger.insert(entry);
        self.apply_changes(changes);
        debug!(%origin, "speculative entry inserted");

        let mut effects = vec![
            Effect::Submit {
                origin: origin.clone(),
                author: origin.author.clone(),
                payload,
            },
            Effect::ArmTimer {
                origin: origin.clone(),
                after: self.config.match_window,
            },
        ];
        self.publish_if_changed(&mut effects);
        Ok((origin, effects))
    }

    /// Re-issue the fetch that stalled sync, if any
    pub fn retry_sync(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.closed {
            return effects;
        }
        match self.subscriber.retry() {
            Some(step) => {
                info!(?step, "retrying stalled sync");
                self.push_step(step, &mut effects);
            }
            None => debug!("retry requested but sync is not stalled"),
        }
        self.publish_if_changed(&mut effects);
        effects
    }

    /// Reject every pending submission and stop accepting input
    pub fn shutdown(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.closed {
            return effects;
        }
        for pending in self.tracker.drain() {
            let origin = pending.origin;
            if let Some(change) = self.ledger.reject(&origin, RejectReason::Cancelled) {
                self.aggregates.apply(&change);
            }
            self.stats.rejected += 1;
            effects.push(Effect::CancelTimer(origin.clone()));
            effects.push(Effect::Settle {
                outcome: Err(LedgerError::SubmissionRejected {
                    origin: origin.clone(),
                    reason: RejectReason::Cancelled,
                }),
                origin,
            });
        }
        self.publish_if_changed(&mut effects);
        self.closed = true;
        info!(topic = %self.config.topic, "engine stopped");
        effects
    }

    fn push_step(&mut self, step: SyncStep, effects: &mut Vec<Effect>) {
        match step {
            SyncStep::ResolveHead => effects.push(Effect::ResolveHead),
            SyncStep::Backfill(request) => {
                self.stats.backfills += 1;
                effects.push(Effect::Backfill(request));
            }
        }
    }

    fn apply_outcome(&mut self, outcome: SyncOutcome, effects: &mut Vec<Effect>) {
        match outcome {
            SyncOutcome::Advanced { entries, next } => {
                self.ingest(entries, effects);
                if let Some(request) = next {
                    self.push_step(SyncStep::Backfill(request), effects);
                }
            }
            SyncOutcome::Stale => {}
            SyncOutcome::Stalled(err) => {
                self.stats.faults += 1;
                warn!(topic = %self.config.topic, error = %err, "sync stalled");
                effects.push(Effect::Fault(err));
            }
        }
    }

    /// Ingest confirmed entries in log order
    fn ingest(&mut self, entries: Vec<RemoteEntry>, effects: &mut Vec<Effect>) {
        for remote in entries {
            if self.ledger.contains_entry(&remote.entry_id) {
                self.stats.duplicates += 1;
                debug!(entry_id = %remote.entry_id, "duplicate entry absorbed");
                continue;
            }
            match self.tracker.match_confirmed(&remote) {
                Some(origin) => {
                    let entry_id = remote.entry_id.clone();
                    let changes = self.ledger.reconcile(&origin, remote);
                    self.apply_changes(changes);
                    self.stats.reconciled += 1;
                    effects.push(Effect::CancelTimer(origin.clone()));
                    effects.push(Effect::Settle {
                        origin,
                        outcome: Ok(entry_id),
                    });
                }
                None => {
                    let changes = self.ledger.insert(LogEntry::confirmed(remote));
                    self.apply_changes(changes);
                }
            }
        }
    }

    fn apply_changes(&mut self, changes: LedgerResult<Vec<LedgerChange>>) {
        match changes {
            Ok(changes) => {
                for change in &changes {
                    if let LedgerChange::Inserted(entry) = change {
                        if entry.is_confirmed() {
                            self.stats.ingested += 1;
                        }
                    }
                    self.aggregates.apply(change);
                }
            }
            Err(LedgerError::DuplicateEntry(entry_id)) => {
                self.stats.duplicates += 1;
                debug!(%entry_id, "entry at or below eviction watermark absorbed");
            }
            Err(err) => warn!(error = %err, "ledger refused entry"),
        }
    }

    fn on_submit_ack(
        &mut self,
        origin: OriginId,
        result: Result<SubmitReceipt, ProviderError>,
        effects: &mut Vec<Effect>,
    ) {
        let receipt = match result {
            Ok(receipt) => receipt,
            Err(err) => {
                self.reject(origin, RejectReason::Provider(err.to_string()), effects);
                return;
            }
        };
        let claimed_by = self
            .ledger
            .get(&EntryRef::Entry(receipt.entry_id.clone()))
            .and_then(LogEntry::origin)
            .filter(|owner| *owner != &origin);
        if let Some(owner) = claimed_by {
            // Left unacknowledged, so the next heuristic match reconciles it
            debug!(
                %origin,
                %owner,
                entry_id = %receipt.entry_id,
                "acknowledged entry already reconciled to another submission"
            );
            return;
        }
        if !self.tracker.acknowledge(&origin, receipt.entry_id.clone()) {
            debug!(%origin, "acknowledgement for resolved submission");
            return;
        }

        let evicted = self
            .ledger
            .watermark()
            .is_some_and(|mark| receipt.position <= mark);
        if self.ledger.contains_entry(&receipt.entry_id) || evicted {
            // Confirmed entry is already visible (or already gone)
            self.tracker.take(&origin);
            if let Some(change) = self.ledger.retire(&origin) {
                self.aggregates.apply(&change);
            }
            self.stats.reconciled += 1;
            effects.push(Effect::CancelTimer(origin.clone()));
            effects.push(Effect::Settle {
                origin,
                outcome: Ok(receipt.entry_id),
            });
        }
    }

    fn reject(&mut self, origin: OriginId, reason: RejectReason, effects: &mut Vec<Effect>) {
        if self.tracker.take(&origin).is_none() {
            debug!(%origin, "rejection for resolved submission ignored");
            return;
        }
        if let Some(change) = self.ledger.reject(&origin, reason.clone()) {
            self.aggregates.apply(&change);
        }
        self.stats.rejected += 1;

        let err = LedgerError::SubmissionRejected {
            origin: origin.clone(),
            reason,
        };
        warn!(error = %err, "submission rejected");
        effects.push(Effect::CancelTimer(origin.clone()));
        effects.push(Effect::Settle {
            origin,
            outcome: Err(err.clone()),
        });
        effects.push(Effect::Fault(err));
    }

    fn publish_if_changed(&mut self, effects: &mut Vec<Effect>) {
        let current = (
            self.ledger.version(),
            self.subscriber.status(),
            self.tracker.len(),
        );
        if current != self.published {
            self.published = current;
            effects.push(Effect::Publish(self.snapshot()));
        }
    }
}
