//! Historical fetcher
//!
//! Splits a position range into pages of at most `page_size` positions,
//! fetches them in order and concatenates the results. A failing page is
//! retried with exponential backoff; once the attempt budget is exhausted the
//! whole fetch fails with `FetchFailure` and nothing partial is returned, so
//! the caller's cursor stays put and a later retry resumes from the same
//! boundary.

use std::future::Future;
use std::sync::Arc;

use ledgerview_core::{
    FetchTarget, LedgerError, LedgerResult, LogPosition, LogProvider, ProviderError, RemoteEntry,
    RetryPolicy,
};
use tracing::{debug, warn};

/// Historical fetcher configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchConfig {
    /// Maximum positions requested per provider call
    pub page_size: u64,
    /// Retry policy applied to each page
    pub retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        FetchConfig {
            page_size: 500,
            retry: RetryPolicy::default(),
        }
    }
}

/// Range fetcher over a log provider
pub struct HistoricalFetcher<P> {
    provider: Arc<P>,
    config: FetchConfig,
}

impl<P> Clone for HistoricalFetcher<P> {
    fn clone(&self) -> Self {
        HistoricalFetcher {
            provider: Arc::clone(&self.provider),
            config: self.config.clone(),
        }
    }
}

impl<P: LogProvider> HistoricalFetcher<P> {
    pub fn new(provider: Arc<P>, config: FetchConfig) -> Self {
        HistoricalFetcher { provider, config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Resolve the latest confirmed position
    pub async fn head(&self) -> LedgerResult<Option<LogPosition>> {
        self.with_retry(FetchTarget::Head, || self.provider.head())
            .await
    }

    /// Fetch every confirmed entry in `start..=end`, in log order
    pub async fn fetch(&self, start: LogPosition, end: LogPosition) -> LedgerResult<Vec<RemoteEntry>> {
        if start > end {
            return Err(LedgerError::InvalidRange { start, end });
        }

        let page_size = self.config.page_size.max(1);
        let mut entries = Vec::new();
        let mut page_start = start;

        loop {
            let page_end = LogPosition::new(
                page_start
                    .value()
                    .saturating_add(page_size - 1)
                    .min(end.value()),
            );

            let page = self.fetch_page(page_start, page_end).await.map_err(|err| {
                // Report the whole logical range, not just the failing page
                match err {
                    LedgerError::FetchFailure {
                        attempts, reason, ..
                    } => LedgerError::FetchFailure {
                        target: FetchTarget::Range { start, end },
                        attempts,
                        reason,
                    },
                    other => other,
                }
            })?;
            entries.extend(page);

            if page_end >= end {
                break;
            }
            page_start = page_end.next();
        }

        debug!(%start, %end, count = entries.len(), "range fetched");
        Ok(entries)
    }

    async fn fetch_page(&self, start: LogPosition, end: LogPosition) -> LedgerResult<Vec<RemoteEntry>> {
        let page = self
            .with_retry(FetchTarget::Range { start, end }, || {
                self.provider.fetch_range(start, end)
            })
            .await?;

        let requested = page.len();
        let page: Vec<RemoteEntry> = page
            .into_iter()
            .filter(|e| e.position >= start && e.position <= end)
            .collect();
        if page.len() != requested {
            warn!(
                %start,
                %end,
                dropped = requested - page.len(),
                "provider returned entries outside the requested range"
            );
        }
        Ok(page)
    }

    async fn with_retry<T, F, Fut>(&self, target: FetchTarget, mut op: F) -> LedgerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let attempts = self.config.retry.attempts();
        let mut backoff = self.config.retry.backoff();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= attempts => {
                    warn!(%target, attempt, error = %err, "fetch retries exhausted");
                    return Err(LedgerError::FetchFailure {
                        target,
                        attempts: attempt,
                        reason: err.to_string(),
                    });
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(%target, attempt, ?delay, error = %err, "fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
