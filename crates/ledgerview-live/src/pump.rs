//! Feed pump
//!
//! Background task that owns the provider's push subscription and forwards
//! what it sees to the engine. When the provider closes the stream the pump
//! reports a disconnect and re-subscribes with backoff.

use std::sync::Arc;
use std::time::Duration;

use ledgerview_core::{Backoff, LogProvider, RemoteEntry};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Event forwarded from the push subscription
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeedEvent {
    /// A subscription is open
    Connected,
    /// A newly confirmed entry
    Entry(RemoteEntry),
    /// The subscription closed
    Disconnected,
}

/// Reconnect delays for the pump
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Handle to a running feed pump. Dropping it stops the pump.
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Stop future deliveries. In-flight fetches are unaffected.
    pub fn unsubscribe(self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn a pump that forwards the provider's push feed into `events`
pub fn spawn_feed<P, E>(
    provider: Arc<P>,
    events: mpsc::Sender<E>,
    policy: ReconnectPolicy,
) -> SubscriptionHandle
where
    P: LogProvider,
    E: From<FeedEvent> + Send + 'static,
{
    let task = tokio::spawn(async move {
        let mut backoff = Backoff::new(policy.initial_backoff, policy.max_backoff);
        loop {
            match provider.subscribe().await {
                Ok(mut stream) => {
                    backoff.reset();
                    info!("live subscription open");
                    if events.send(FeedEvent::Connected.into()).await.is_err() {
                        break; // Engine gone
                    }
                    while let Some(entry) = stream.recv().await {
                        if events.send(FeedEvent::Entry(entry).into()).await.is_err() {
                            return;
                        }
                    }
                    if events.send(FeedEvent::Disconnected.into()).await.is_err() {
                        break;
                    }
                    let delay = backoff.next_delay();
                    warn!(?delay, "live subscription closed, reconnecting");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(error = %e, ?delay, "subscribe failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    });

    SubscriptionHandle { task }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerview_core::{
        AuthorId, EntryStream, LogPosition, ProviderError, SubmitReceipt, Timestamp,
    };
    use parking_lot::Mutex;

    /// Provider whose `subscribe` hands out pre-built streams in order
    struct ScriptedFeed {
        streams: Mutex<Vec<Result<EntryStream, ProviderError>>>,
    }

    impl LogProvider for ScriptedFeed {
        async fn head(&self) -> Result<Option<LogPosition>, ProviderError> {
            Ok(None)
        }

        async fn fetch_range(
            &self,
            _start: LogPosition,
            _end: LogPosition,
        ) -> Result<Vec<RemoteEntry>, ProviderError> {
            Ok(Vec::new())
        }

        async fn subscribe(&self) -> Result<EntryStream, ProviderError> {
            let next = self.streams.lock().pop();
            match next {
                Some(stream) => stream,
                None => std::future::pending().await,
            }
        }

        async fn submit_entry(
            &self,
            _author: AuthorId,
            _payload: String,
        ) -> Result<SubmitReceipt, ProviderError> {
            Err(ProviderError::new("read only"))
        }
    }

    fn entry(p: u64) -> RemoteEntry {
        RemoteEntry::new(format!("e{p}"), "0xA", "x", LogPosition::new(p), Timestamp::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_forwards_and_reconnects() {
        let (first_tx, first_rx) = mpsc::channel(8);
        let (second_tx, second_rx) = mpsc::channel(8);
        // Popped from the back
        let provider = Arc::new(ScriptedFeed {
            streams: Mutex::new(vec![
                Ok(second_rx),
                Err(ProviderError::new("refused")),
                Ok(first_rx),
            ]),
        });

        first_tx.send(entry(1)).await.unwrap();
        drop(first_tx);
        second_tx.send(entry(2)).await.unwrap();

        let (events_tx, mut events) = mpsc::channel::<FeedEvent>(16);
        let handle = spawn_feed(provider, events_tx, ReconnectPolicy::default());

        assert_eq!(events.recv().await, Some(FeedEvent::Connected));
        assert_eq!(events.recv().await, Some(FeedEvent::Entry(entry(1))));
        assert_eq!(events.recv().await, Some(FeedEvent::Disconnected));
        assert_eq!(events.recv().await, Some(FeedEvent::Connected));
        assert_eq!(events.recv().await, Some(FeedEvent::Entry(entry(2))));
        assert!(handle.is_active());

        handle.unsubscribe();
        second_tx.send(entry(3)).await.ok();
        assert_eq!(events.recv().await, None);
    }
}
