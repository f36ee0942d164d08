//! Async driver and host handle
//!
//! `start` spawns one driver task per engine. The driver is the only owner of
//! the `Engine`; it multiplexes host commands with provider completions and
//! performs the effects the engine returns. Fetches, submissions and timers
//! run as their own tasks and report back through the input channel, so the
//! engine always sees one completion at a time, in arrival order.
//!
//! Hosts hold an `EngineHandle`. Reads go through a `watch` channel of
//! immutable snapshots and never wait on the driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ledgerview_core::{
    AuthorId, EntryId, LedgerError, LedgerResult, LogEntry, LogProvider, OriginId, Timestamp,
};
use ledgerview_fetch::HistoricalFetcher;
use ledgerview_live::{spawn_feed, SubscriptionHandle, SyncStatus};
use ledgerview_state::{AggregateRecord, AggregateTotals, AuthorStanding, Scope, ViewSnapshot};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::{Effect, Engine, EngineConfig, Input};

/// Number of authors returned by `top_contributors`
pub const DEFAULT_TOP_AUTHORS: usize = 5;

/// Delivered to change listeners
#[derive(Clone, Debug)]
pub enum EngineNotice {
    /// A new snapshot was published
    Updated(ViewSnapshot),
    /// A failure the host should see
    Fault(LedgerError),
}

type Listener = Arc<dyn Fn(&EngineNotice) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener)>>,
}

impl Listeners {
    fn add(&self, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, listener));
        id
    }

    fn remove(&self, id: u64) {
        self.entries.lock().retain(|(other, _)| *other != id);
    }

    fn notify(&self, notice: &EngineNotice) {
        // Callbacks run outside the lock so they may register or cancel
        let current: Vec<Listener> = self.entries.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in current {
            listener(notice);
        }
    }
}

/// Registration returned by `on_change`. Dropping it cancels the listener.
pub struct ChangeSubscription {
    id: u64,
    listeners: Arc<Listeners>,
}

impl ChangeSubscription {
    pub fn cancel(self) {}
}

impl Drop for ChangeSubscription {
    fn drop(&mut self) {
        self.listeners.remove(self.id);
    }
}

/// Outcome of one submission
#[derive(Debug)]
pub struct PendingHandle {
    origin: OriginId,
    outcome: oneshot::Receiver<LedgerResult<EntryId>>,
}

impl PendingHandle {
    pub fn origin(&self) -> &OriginId {
        &self.origin
    }

    /// Wait for the submission to be confirmed or rejected
    pub async fn confirmed(self) -> LedgerResult<EntryId> {
        self.outcome.await.unwrap_or(Err(LedgerError::EngineClosed))
    }
}

enum Command {
    Submit {
        author: AuthorId,
        payload: String,
        reply: oneshot::Sender<LedgerResult<PendingHandle>>,
    },
    RetrySync {
        done: oneshot::Sender<()>,
    },
    Teardown {
        done: oneshot::Sender<()>,
    },
}

/// Host handle to a running engine
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<ViewSnapshot>,
    listeners: Arc<Listeners>,
    task: JoinHandle<()>,
}

/// Start an engine following `provider`
pub fn start<P: LogProvider>(config: EngineConfig, provider: Arc<P>) -> LedgerResult<EngineHandle> {
    config.validate()?;
    info!(topic = %config.topic, "starting engine");

    let (command_tx, command_rx) = mpsc::channel(config.command_buffer);
    let (input_tx, input_rx) = mpsc::channel(config.input_buffer);
    let (view_tx, view_rx) = watch::channel(ViewSnapshot::empty(SyncStatus::Seeding));
    let listeners = Arc::new(Listeners::default());

    let feed = spawn_feed(provider.clone(), input_tx.clone(), config.reconnect_policy());
    let driver = Driver {
        fetcher: HistoricalFetcher::new(provider.clone(), config.fetch_config()),
        engine: Engine::new(config),
        provider,
        inputs: input_tx,
        feed: Some(feed),
        timers: HashMap::new(),
        resolvers: HashMap::new(),
        view: view_tx,
        listeners: listeners.clone(),
    };
    let task = tokio::spawn(driver.run(command_rx, input_rx));

    Ok(EngineHandle {
        commands: command_tx,
        view: view_rx,
        listeners,
        task,
    })
}

impl EngineHandle {
    /// Latest published snapshot
    pub fn snapshot(&self) -> ViewSnapshot {
        self.view.borrow().clone()
    }

    /// Entries of the latest snapshot matching `scope` and `search`
    pub fn get_snapshot(&self, scope: &Scope, search: Option<&str>) -> Vec<LogEntry> {
        self.view.borrow().filter_by(scope, search)
    }

    pub fn aggregate(&self, author: &AuthorId) -> Option<AggregateRecord> {
        self.view.borrow().aggregate(author)
    }

    pub fn top_authors(&self, k: usize) -> Vec<AuthorStanding> {
        self.view.borrow().top_authors(k)
    }

    pub fn top_contributors(&self) -> Vec<AuthorStanding> {
        self.top_authors(DEFAULT_TOP_AUTHORS)
    }

    pub fn totals(&self) -> AggregateTotals {
        self.view.borrow().totals()
    }

    pub fn status(&self) -> SyncStatus {
        self.view.borrow().status
    }

    /// Receiver that observes every published snapshot
    pub fn changes(&self) -> watch::Receiver<ViewSnapshot> {
        self.view.clone()
    }

    /// Register a callback for snapshots and faults
    pub fn on_change<F>(&self, callback: F) -> ChangeSubscription
    where
        F: Fn(&EngineNotice) + Send + Sync + 'static,
    {
        let id = self.listeners.add(Arc::new(callback));
        ChangeSubscription {
            id,
            listeners: self.listeners.clone(),
        }
    }

    /// Submit a write. The speculative entry is visible once this returns.
    pub async fn submit(
        &self,
        author: impl Into<AuthorId>,
        payload: impl Into<String>,
    ) -> LedgerResult<PendingHandle> {
        let (reply, response) = oneshot::channel();
        let command = Command::Submit {
            author: author.into(),
            payload: payload.into(),
            reply,
        };
        self.commands
            .send(command)
            .await
            .map_err(|_| LedgerError::EngineClosed)?;
        response.await.map_err(|_| LedgerError::EngineClosed)?
    }

    /// Re-issue the fetch that stalled sync
    pub async fn retry_sync(&self) -> LedgerResult<()> {
        let (done, finished) = oneshot::channel();
        self.commands
            .send(Command::RetrySync { done })
            .await
            .map_err(|_| LedgerError::EngineClosed)?;
        finished.await.map_err(|_| LedgerError::EngineClosed)
    }

    /// Stop the engine. Pending submissions resolve as cancelled.
    pub async fn teardown(self) {
        let (done, finished) = oneshot::channel();
        if self.commands.send(Command::Teardown { done }).await.is_ok() {
            let _ = finished.await;
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "engine task ended abnormally");
        }
    }
}

struct Driver<P: LogProvider> {
    engine: Engine,
    fetcher: HistoricalFetcher<P>,
    provider: Arc<P>,
    inputs: mpsc::Sender<Input>,
    feed: Option<SubscriptionHandle>,
    timers: HashMap<OriginId, AbortHandle>,
    resolvers: HashMap<OriginId, oneshot::Sender<LedgerResult<EntryId>>>,
    view: watch::Sender<ViewSnapshot>,
    listeners: Arc<Listeners>,
}

impl<P: LogProvider> Driver<P> {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut inputs: mpsc::Receiver<Input>) {
        let effects = self.engine.start();
        self.execute(effects);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Submit { author, payload, reply }) => {
                        let result = self.submit(author, &payload);
                        let _ = reply.send(result);
                    }
                    Some(Command::RetrySync { done }) => {
                        let effects = self.engine.retry_sync();
                        self.execute(effects);
                        let _ = done.send(());
                    }
                    Some(Command::Teardown { done }) => {
                        self.shutdown();
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        debug!("all handles dropped");
                        self.shutdown();
                        break;
                    }
                },
                Some(input) = inputs.recv() => {
                    let effects = self.engine.handle(input);
                    self.execute(effects);
                }
            }
        }
    }

    fn submit(&mut self, author: AuthorId, payload: &str) -> LedgerResult<PendingHandle> {
        let (origin, effects) = self.engine.submit(author, payload, Timestamp::now())?;
        let (resolve, outcome) = oneshot::channel();
        self.resolvers.insert(origin.clone(), resolve);
        self.execute(effects);
        Ok(PendingHandle { origin, outcome })
    }

    fn shutdown(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.unsubscribe();
        }
        let effects = self.engine.shutdown();
        self.execute(effects);
        for (_, timer) in self.timers.drain() {
            timer.abort();
        }
        self.resolvers.clear();
    }

    fn execute(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ResolveHead => {
                    let fetcher = self.fetcher.clone();
                    let inputs = self.inputs.clone();
                    tokio::spawn(async move {
                        let result = fetcher.head().await;
                        let _ = inputs.send(Input::HeadResolved(result)).await;
                    });
                }
                Effect::Backfill(request) => {
                    let fetcher = self.fetcher.clone();
                    let inputs = self.inputs.clone();
                    tokio::spawn(async move {
                        let result = fetcher.fetch(request.start, request.end).await;
                        let _ = inputs.send(Input::BackfillDone { request, result }).await;
                    });
                }
                Effect::Submit {
                    origin,
                    author,
                    payload,
                } => {
                    let provider = self.provider.clone();
                    let inputs = self.inputs.clone();
                    tokio::spawn(async move {
                        let result = provider.submit_entry(author, payload).await;
                        let _ = inputs.send(Input::SubmitAcked { origin, result }).await;
                    });
                }
                Effect::ArmTimer { origin, after } => {
                    let inputs = self.inputs.clone();
                    let expired = origin.clone();
                    let timer = tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = inputs.send(Input::TimerExpired(expired)).await;
                    });
                    if let Some(previous) = self.timers.insert(origin, timer.abort_handle()) {
                        previous.abort();
                    }
                }
                Effect::CancelTimer(origin) => {
                    if let Some(timer) = self.timers.remove(&origin) {
                        timer.abort();
                    }
                }
                Effect::Settle { origin, outcome } => {
                    if let Some(resolve) = self.resolvers.remove(&origin) {
                        let _ = resolve.send(outcome);
                    }
                }
                Effect::Publish(snapshot) => {
                    self.view.send_replace(snapshot.clone());
                    self.listeners.notify(&EngineNotice::Updated(snapshot));
                }
                Effect::Fault(err) => self.listeners.notify(&EngineNotice::Fault(err)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use ledgerview_core::{
        EntryStream, LogPosition, ProviderError, RejectReason, RemoteEntry, SubmitReceipt,
    };

    /// Log with a fixed history, a feed held open by the test, and a
    /// submission sink that never answers
    struct QuietLog {
        history: Vec<RemoteEntry>,
        feed: Mutex<Option<EntryStream>>,
    }

    impl QuietLog {
        fn new(head: u64) -> (Arc<Self>, mpsc::Sender<RemoteEntry>) {
            let (tx, rx) = mpsc::channel(16);
            let history = (1..=head)
                .map(|p| {
                    RemoteEntry::new(
                        format!("e{p}"),
                        "0xa",
                        format!("msg {p}"),
                        LogPosition::new(p),
                        Timestamp::from_secs(p as i64),
                    )
                })
                .collect();
            let log = QuietLog {
                history,
                feed: Mutex::new(Some(rx)),
            };
            (Arc::new(log), tx)
        }
    }

    impl LogProvider for QuietLog {
        async fn head(&self) -> Result<Option<LogPosition>, ProviderError> {
            Ok(self.history.last().map(|e| e.position))
        }

        async fn fetch_range(
            &self,
            start: LogPosition,
            end: LogPosition,
        ) -> Result<Vec<RemoteEntry>, ProviderError> {
            Ok(self
                .history
                .iter()
                .filter(|e| e.position >= start && e.position <= end)
                .cloned()
                .collect())
        }

        async fn subscribe(&self) -> Result<EntryStream, ProviderError> {
            let stream = self.feed.lock().take();
            match stream {
                Some(stream) => Ok(stream),
                None => std::future::pending().await,
            }
        }

        async fn submit_entry(
            &self,
            _author: AuthorId,
            _payload: String,
        ) -> Result<SubmitReceipt, ProviderError> {
            std::future::pending().await
        }
    }

    async fn wait_for(handle: &EngineHandle, check: impl Fn(&ViewSnapshot) -> bool) {
        let mut changes = handle.changes();
        loop {
            if check(&*changes.borrow_and_update()) {
                return;
            }
            changes.changed().await.expect("engine running");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeds_and_follows_feed() {
        let (log, feed) = QuietLog::new(3);
        let handle = start(EngineConfig::default(), log).unwrap();

        wait_for(&handle, |s| s.status == SyncStatus::Live && s.len() == 3).await;
        feed.send(RemoteEntry::new(
            "e4",
            "0xb",
            "hello",
            LogPosition::new(4),
            Timestamp::from_secs(4),
        ))
        .await
        .unwrap();
        wait_for(&handle, |s| s.len() == 4).await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.entries()[0].position(), Some(LogPosition::new(4)));
        assert_eq!(handle.aggregate(&AuthorId::new("0xb")).unwrap().count, 1);
        assert_eq!(handle.top_contributors()[0].author, AuthorId::new("0xa"));
        assert_eq!(
            handle
                .get_snapshot(&Scope::Author(AuthorId::new("0xB")), None)
                .len(),
            1
        );
        handle.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_submission_times_out() {
        let (log, _feed) = QuietLog::new(1);
        let config = EngineConfig::default().with_match_window(Duration::from_secs(5));
        let handle = start(config, log).unwrap();
        wait_for(&handle, |s| s.status == SyncStatus::Live).await;

        let faults = Arc::new(Mutex::new(Vec::new()));
        let seen = faults.clone();
        let _subscription = handle.on_change(move |notice| {
            if let EngineNotice::Fault(err) = notice {
                seen.lock().push(err.clone());
            }
        });

        let pending = handle.submit("0xA", "hello").await.unwrap();
        assert_eq!(handle.snapshot().len(), 2);
        assert_eq!(handle.snapshot().pending, 1);

        let result = pending.confirmed().await;
        assert!(matches!(
            result,
            Err(LedgerError::SubmissionRejected {
                reason: RejectReason::Timeout,
                ..
            })
        ));
        wait_for(&handle, |s| s.pending == 0).await;
        assert_eq!(handle.snapshot().len(), 1);
        assert_eq!(faults.lock().len(), 1);
        handle.teardown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_pending() {
        let (log, _feed) = QuietLog::new(0);
        let handle = start(EngineConfig::default(), log).unwrap();
        wait_for(&handle, |s| s.status == SyncStatus::Live).await;

        let pending = handle.submit("0xa", "bye").await.unwrap();
        handle.teardown().await;
        assert!(matches!(
            pending.confirmed().await,
            Err(LedgerError::SubmissionRejected {
                reason: RejectReason::Cancelled,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_listener_not_called() {
        let (log, feed) = QuietLog::new(0);
        let handle = start(EngineConfig::default(), log).unwrap();
        wait_for(&handle, |s| s.status == SyncStatus::Live).await;

        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let subscription = handle.on_change(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        subscription.cancel();

        feed.send(RemoteEntry::new(
            "e1",
            "0xa",
            "m",
            LogPosition::new(1),
            Timestamp::from_secs(1),
        ))
        .await
        .unwrap();
        wait_for(&handle, |s| s.len() == 1).await;
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        handle.teardown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_refused() {
        let (log, _feed) = QuietLog::new(0);
        let result = start(EngineConfig::default().with_capacity(0), log);
        assert!(matches!(result, Err(LedgerError::Config(_))));
    }
}
