use std::num::NonZeroU64;
use std::time::Duration;

use futures::{stream, Stream, StreamExt};
use serde::Serialize;

use crate::config::ScannerConfig;
use crate::controller::{self, ChunkOutcome, FailedRange, RetryPolicy};
use crate::error::ScanError;
use crate::fetcher::ChunkFetcher;
use crate::types::{dedup_logs, BlockRange, LogEntry, LogFilter};

/// Per-scan overrides of the scanner configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Number of blocks per query
    pub chunk_width: Option<u64>,
    /// Retry attempts before bisecting or giving up on a range
    pub max_retries: Option<u32>,
    /// Initial backoff delay
    pub base_delay: Option<Duration>,
}

/// The logs of a scan, sorted by block number and log index.
///
/// A scan does not abort when part of the range keeps failing. The affected
/// sub-ranges are listed in `failed` and their logs are missing from `logs`,
/// so callers must check [`ScanReport::is_complete`] before treating the
/// result as exhaustive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub logs: Vec<LogEntry>,
    pub failed: Vec<FailedRange>,
}

impl ScanReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// Number of blocks whose logs could not be fetched
    pub fn missing_blocks(&self) -> u64 {
        self.failed
            .iter()
            .fold(0, |total, f| total.saturating_add(f.range.block_count()))
    }
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    chunk_width: NonZeroU64,
    chunk_pause: Duration,
    policy: RetryPolicy,
}

/// Fetches the logs of a block range in fixed-size chunks.
///
/// Chunks are queried one after the other, never concurrently, with a short
/// pause in between to go easy on rate limited endpoints.
#[derive(Debug)]
pub struct LogScanner<F> {
    fetcher: F,
    config: ScannerConfig,
}

impl<F: ChunkFetcher> LogScanner<F> {
    pub fn new(fetcher: F, config: ScannerConfig) -> Self {
        Self { fetcher, config }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Scans `[from_block, to_block]` with the configured settings
    pub async fn scan(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: u64,
    ) -> Result<ScanReport, ScanError> {
        self.scan_with(filter, from_block, to_block, &ScanOptions::default())
            .await
    }

    /// Scans `[from_block, to_block]`, overriding the configured settings
    /// with `options`. Invalid input is rejected before any query is made.
    pub async fn scan_with(
        &self,
        filter: &LogFilter,
        from_block: u64,
        to_block: u64,
        options: &ScanOptions,
    ) -> Result<ScanReport, ScanError> {
        let range = BlockRange::new(from_block, to_block)?;
        let chunks = self.chunk_stream_with(filter, range, options)?;
        futures::pin_mut!(chunks);

        let mut report = ScanReport::default();
        while let Some(chunk) = chunks.next().await {
            report.logs.extend(chunk.logs);
            report.failed.extend(chunk.failed);
        }

        // Adjacent chunks may both report a log sitting on their boundary
        dedup_logs(&mut report.logs);

        if report.is_complete() {
            tracing::info!(%range, logs = report.logs.len(), "Scan complete");
        } else {
            tracing::warn!(
                %range,
                logs = report.logs.len(),
                failed_ranges = report.failed.len(),
                missing_blocks = report.missing_blocks(),
                "Scan finished with missing ranges"
            );
        }

        Ok(report)
    }

    /// Yields the outcome of every chunk of `range` as soon as it is fetched
    pub fn chunk_stream<'a>(
        &'a self,
        filter: &'a LogFilter,
        range: BlockRange,
    ) -> Result<impl Stream<Item = ChunkOutcome> + 'a, ScanError> {
        self.chunk_stream_with(filter, range, &ScanOptions::default())
    }

    pub fn chunk_stream_with<'a>(
        &'a self,
        filter: &'a LogFilter,
        range: BlockRange,
        options: &ScanOptions,
    ) -> Result<impl Stream<Item = ChunkOutcome> + 'a, ScanError> {
        let settings = self.settings(options)?;

        Ok(stream::unfold(
            (range.chunks(settings.chunk_width), true),
            move |(mut chunks, first)| async move {
                let chunk = chunks.next()?;

                if !first {
                    tokio::time::sleep(settings.chunk_pause).await;
                }

                tracing::info!(
                    from = chunk.start(),
                    to = chunk.end(),
                    "Querying logs"
                );

                let outcome = controller::fetch_range(
                    &self.fetcher,
                    filter,
                    chunk,
                    &settings.policy,
                )
                .await;

                tracing::info!(
                    from = chunk.start(),
                    to = chunk.end(),
                    found = outcome.logs.len(),
                    "Found logs"
                );

                Some((outcome, (chunks, false)))
            },
        ))
    }

    fn settings(&self, options: &ScanOptions) -> Result<Settings, ScanError> {
        let chunk_width =
            options.chunk_width.unwrap_or(self.config.chunk_width);
        let chunk_width =
            NonZeroU64::new(chunk_width).ok_or(ScanError::ZeroChunkWidth)?;

        let mut policy = self.config.retry_policy();
        if let Some(max_retries) = options.max_retries {
            policy.max_retries = max_retries;
        }
        if let Some(base_delay) = options.base_delay {
            policy.base_delay = base_delay;
        }

        Ok(Settings {
            chunk_width,
            chunk_pause: self.config.chunk_pause(),
            policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(from: u64, to: u64) -> FailedRange {
        FailedRange {
            range: BlockRange::new(from, to).unwrap(),
            error: "timeout".to_string(),
        }
    }

    #[test]
    fn missing_blocks_counts_failed_ranges() {
        let report = ScanReport {
            logs: vec![],
            failed: vec![failed(100, 150), failed(400, 400)],
        };

        assert!(!report.is_complete());
        assert_eq!(report.missing_blocks(), 52);
    }

    #[test]
    fn missing_blocks_saturates() {
        let report = ScanReport {
            logs: vec![],
            failed: vec![failed(0, u64::MAX), failed(5, 10)],
        };

        assert_eq!(report.missing_blocks(), u64::MAX);
    }
}
