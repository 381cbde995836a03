use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use ethers::providers::Middleware;

use crate::error::FetchError;
use crate::types::{BlockRange, LogEntry, LogFilter};

/// Executes exactly one bounded-range log query.
///
/// Implementations must not retry: failures are returned as they happen so
/// that the caller can decide between backing off and narrowing the range.
#[async_trait]
pub trait ChunkFetcher: Send + Sync {
    /// Returns the logs matching `filter` in `range`, in ascending block and
    /// log index order
    async fn fetch_logs(
        &self,
        filter: &LogFilter,
        range: BlockRange,
    ) -> Result<Vec<LogEntry>, FetchError>;
}

#[async_trait]
impl<T: ChunkFetcher + ?Sized> ChunkFetcher for Arc<T> {
    async fn fetch_logs(
        &self,
        filter: &LogFilter,
        range: BlockRange,
    ) -> Result<Vec<LogEntry>, FetchError> {
        (**self).fetch_logs(filter, range).await
    }
}

#[async_trait]
impl<T: ChunkFetcher + ?Sized> ChunkFetcher for &T {
    async fn fetch_logs(
        &self,
        filter: &LogFilter,
        range: BlockRange,
    ) -> Result<Vec<LogEntry>, FetchError> {
        (**self).fetch_logs(filter, range).await
    }
}

/// Fetches logs with `eth_getLogs` through an ethers middleware stack
#[derive(Debug)]
pub struct MiddlewareFetcher<M: Middleware> {
    middleware: Arc<M>,
}

impl<M: Middleware> Clone for MiddlewareFetcher<M> {
    fn clone(&self) -> Self {
        Self {
            middleware: self.middleware.clone(),
        }
    }
}

impl<M: Middleware> MiddlewareFetcher<M> {
    pub fn new(middleware: Arc<M>) -> Self {
        Self { middleware }
    }

    pub fn middleware(&self) -> &Arc<M> {
        &self.middleware
    }
}

#[async_trait]
impl<M> ChunkFetcher for MiddlewareFetcher<M>
where
    M: Middleware + Debug + 'static,
{
    async fn fetch_logs(
        &self,
        filter: &LogFilter,
        range: BlockRange,
    ) -> Result<Vec<LogEntry>, FetchError> {
        tracing::trace!(from = range.start(), to = range.end(), "eth_getLogs");

        let logs = self
            .middleware
            .get_logs(&filter.for_range(range))
            .await
            .map_err(|e| FetchError::from_middleware(&e))?;

        // Logs flagged as removed belong to a reorged block
        let mut entries = logs
            .into_iter()
            .filter(|log| log.removed != Some(true))
            .map(LogEntry::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        entries.sort_by_key(LogEntry::position);

        Ok(entries)
    }
}
