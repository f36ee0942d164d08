//! In-memory authoritative log
//!
//! `MockLog` implements `LogProvider` over a plain vector of confirmed
//! entries. Tests append foreign writes directly, drop the push connection at
//! will, and choose how submissions are answered. A `FaultInjector` adds
//! seeded provider misbehaviour on top.

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use ledgerview_core::{
    AuthorId, EntryStream, LogPosition, LogProvider, ProviderError, RemoteEntry, SubmitReceipt,
    Timestamp,
};

use crate::chaos::{ChaosConfig, ChaosStats, FaultInjector};

/// Push channel depth per subscriber
const FEED_DEPTH: usize = 256;

/// How the log answers `submit_entry`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitMode {
    /// Record the write and push it to subscribers
    Confirm,
    /// Refuse every write with this message
    Reject(String),
    /// Never answer
    Unanswered,
}

struct LogState {
    entries: Vec<RemoteEntry>,
    feeds: Vec<mpsc::Sender<RemoteEntry>>,
    /// Deliveries held back to be pushed after the next one
    deferred: Vec<RemoteEntry>,
    chaos: FaultInjector,
    submit_mode: SubmitMode,
    submissions: u64,
}

impl LogState {
    fn record(&mut self, author: AuthorId, payload: String) -> RemoteEntry {
        let position = LogPosition::new(self.entries.len() as u64 + 1);
        let entry = RemoteEntry::new(
            format!("e{}", position.value()),
            author,
            payload,
            position,
            Timestamp::now(),
        );
        self.entries.push(entry.clone());
        entry
    }

    fn announce(&mut self, entry: RemoteEntry) {
        if self.chaos.reorder() {
            debug!(position = %entry.position, "delivery deferred");
            self.deferred.push(entry);
            return;
        }
        let mut batch = vec![entry];
        batch.append(&mut self.deferred);

        for entry in batch {
            let copies = if self.chaos.duplicate() { 2 } else { 1 };
            for _ in 0..copies {
                self.feeds.retain(|feed| match feed.try_send(entry.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(position = %entry.position, "subscriber lagging, delivery lost");
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }

        if self.chaos.drop_feed() {
            debug!(feeds = self.feeds.len(), "push connections dropped");
            self.feeds.clear();
        }
    }
}

/// Fault-injecting in-memory log
pub struct MockLog {
    state: Mutex<LogState>,
}

impl MockLog {
    pub fn new(chaos: ChaosConfig, seed: u64) -> Self {
        MockLog {
            state: Mutex::new(LogState {
                entries: Vec::new(),
                feeds: Vec::new(),
                deferred: Vec::new(),
                chaos: FaultInjector::new(chaos, seed),
                submit_mode: SubmitMode::Confirm,
                submissions: 0,
            }),
        }
    }

    pub fn reliable() -> Self {
        Self::new(ChaosConfig::reliable(), 0)
    }

    /// Log pre-filled with `authors.len()` entries, one per author in order
    pub fn with_history(authors: &[&str]) -> Self {
        let log = Self::reliable();
        for (i, author) in authors.iter().enumerate() {
            log.append_unannounced(*author, format!("msg {}", i + 1));
        }
        log
    }

    /// Confirm a foreign write and push it to subscribers
    pub fn append(&self, author: impl Into<AuthorId>, payload: impl Into<String>) -> RemoteEntry {
        let mut state = self.state.lock();
        let entry = state.record(author.into(), payload.into());
        state.announce(entry.clone());
        entry
    }

    /// Confirm a foreign write without pushing it
    pub fn append_unannounced(
        &self,
        author: impl Into<AuthorId>,
        payload: impl Into<String>,
    ) -> RemoteEntry {
        self.state.lock().record(author.into(), payload.into())
    }

    /// Close every open push connection
    pub fn drop_feeds(&self) {
        self.state.lock().feeds.clear();
    }

    /// Open push connections
    pub fn feed_count(&self) -> usize {
        let mut state = self.state.lock();
        state.feeds.retain(|feed| !feed.is_closed());
        state.feeds.len()
    }

    pub fn head_position(&self) -> Option<LogPosition> {
        self.state.lock().entries.last().map(|e| e.position)
    }

    pub fn entries(&self) -> Vec<RemoteEntry> {
        self.state.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// `submit_entry` calls received
    pub fn submissions(&self) -> u64 {
        self.state.lock().submissions
    }

    pub fn set_submit_mode(&self, mode: SubmitMode) {
        self.state.lock().submit_mode = mode;
    }

    pub fn set_chaos(&self, config: ChaosConfig) {
        self.state.lock().chaos.set_config(config);
    }

    pub fn chaos_stats(&self) -> ChaosStats {
        self.state.lock().chaos.stats().clone()
    }
}

impl LogProvider for MockLog {
    async fn head(&self) -> Result<Option<LogPosition>, ProviderError> {
        let mut state = self.state.lock();
        if state.chaos.fail_fetch() {
            return Err(ProviderError::new("head query failed"));
        }
        Ok(state.entries.last().map(|e| e.position))
    }

    async fn fetch_range(
        &self,
        start: LogPosition,
        end: LogPosition,
    ) -> Result<Vec<RemoteEntry>, ProviderError> {
        let mut state = self.state.lock();
        if state.chaos.fail_fetch() {
            return Err(ProviderError::new("range query failed"));
        }
        Ok(state
            .entries
            .iter()
            .filter(|e| e.position >= start && e.position <= end)
            .cloned()
            .collect())
    }

    async fn subscribe(&self) -> Result<EntryStream, ProviderError> {
        let mut state = self.state.lock();
        if state.chaos.fail_subscribe() {
            return Err(ProviderError::new("subscribe refused"));
        }
        let (tx, rx) = mpsc::channel(FEED_DEPTH);
        state.feeds.push(tx);
        Ok(rx)
    }

    async fn submit_entry(
        &self,
        author: AuthorId,
        payload: String,
    ) -> Result<SubmitReceipt, ProviderError> {
        let (mode, latency) = {
            let mut state = self.state.lock();
            state.submissions += 1;
            (state.submit_mode.clone(), state.chaos.submit_latency())
        };
        tokio::time::sleep(latency).await;

        match mode {
            SubmitMode::Confirm => {
                let mut state = self.state.lock();
                if state.chaos.reject_submit() {
                    return Err(ProviderError::new("write refused"));
                }
                let entry = state.record(author, payload);
                state.announce(entry.clone());
                Ok(SubmitReceipt {
                    entry_id: entry.entry_id,
                    position: entry.position,
                    timestamp: entry.timestamp,
                })
            }
            SubmitMode::Reject(reason) => Err(ProviderError::new(reason)),
            SubmitMode::Unanswered => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_and_range() {
        let log = MockLog::with_history(&["0xa", "0xb", "0xc"]);
        assert_eq!(log.head().await.unwrap(), Some(LogPosition::new(3)));

        let range = log
            .fetch_range(LogPosition::new(2), LogPosition::new(9))
            .await
            .unwrap();
        let ids: Vec<String> = range.iter().map(|e| e.entry_id.to_string()).collect();
        assert_eq!(ids, vec!["e2", "e3"]);
    }

    #[tokio::test]
    async fn test_append_pushes_to_subscribers() {
        let log = MockLog::reliable();
        let mut feed = log.subscribe().await.unwrap();
        log.append_unannounced("0xa", "quiet");
        let entry = log.append("0xb", "loud");

        assert_eq!(feed.recv().await, Some(entry));
        log.drop_feeds();
        assert_eq!(feed.recv().await, None);
        assert_eq!(log.feed_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_modes() {
        let log = MockLog::reliable();
        let receipt = log
            .submit_entry(AuthorId::new("0xa"), "hi".to_string())
            .await
            .unwrap();
        assert_eq!(receipt.position, LogPosition::new(1));
        assert_eq!(log.len(), 1);

        log.set_submit_mode(SubmitMode::Reject("no gas".into()));
        let result = log.submit_entry(AuthorId::new("0xa"), "hi".to_string()).await;
        assert_eq!(result, Err(ProviderError::new("no gas")));
        assert_eq!(log.len(), 1);
        assert_eq!(log.submissions(), 2);
    }

    #[tokio::test]
    async fn test_hostile_feed_eventually_duplicates() {
        let log = MockLog::new(
            ChaosConfig {
                duplicate_rate: 1.0,
                ..ChaosConfig::reliable()
            },
            9,
        );
        let mut feed = log.subscribe().await.unwrap();
        let entry = log.append("0xa", "twice");
        assert_eq!(feed.recv().await, Some(entry.clone()));
        assert_eq!(feed.recv().await, Some(entry));
        assert_eq!(log.chaos_stats().duplicates, 1);
    }
}
