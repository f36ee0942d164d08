//! Log provider contract
//!
//! The authoritative log is an external collaborator. The engine consumes it
//! through four capabilities: resolving the head position, fetching a range
//! of confirmed entries, holding a live push subscription, and submitting a
//! write that the log eventually records.

use std::future::Future;

use tokio::sync::mpsc;

use crate::{AuthorId, LogPosition, ProviderError, RemoteEntry, SubmitReceipt};

/// Live push feed. The provider closes the channel when the connection drops.
pub type EntryStream = mpsc::Receiver<RemoteEntry>;

/// Source of confirmed log entries and sink for local submissions
pub trait LogProvider: Send + Sync + 'static {
    /// Latest confirmed position, `None` for an empty log
    fn head(&self) -> impl Future<Output = Result<Option<LogPosition>, ProviderError>> + Send;

    /// Every confirmed entry with a position in `start..=end`, in log order
    fn fetch_range(
        &self,
        start: LogPosition,
        end: LogPosition,
    ) -> impl Future<Output = Result<Vec<RemoteEntry>, ProviderError>> + Send;

    /// Open a push subscription for newly confirmed entries
    fn subscribe(&self) -> impl Future<Output = Result<EntryStream, ProviderError>> + Send;

    /// Submit a write; resolves once the log has recorded it or refused it
    fn submit_entry(
        &self,
        author: AuthorId,
        payload: String,
    ) -> impl Future<Output = Result<SubmitReceipt, ProviderError>> + Send;
}
