//! Retry and bisection policy around a single chunk query.
//!
//! A failing range is first retried with exponential backoff when the failure
//! looks transient. Once retries are spent, or the failure is persistent, a
//! range wider than the minimum split width is halved and each half is
//! fetched on its own. Ranges that still fail are recorded and skipped.

use std::time::Duration;

use serde::Serialize;

use crate::fetcher::ChunkFetcher;
use crate::types::{dedup_logs, BlockRange, LogEntry, LogFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts left for a range before it is given up on. Every backoff
    /// retry and every bisection consumes one.
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each following one
    pub base_delay: Duration,
    /// Ranges with `to - from` at or below this are never bisected
    pub min_split_width: u64,
}

/// A sub-range whose logs could not be fetched
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedRange {
    pub range: BlockRange,
    pub error: String,
}

/// Everything fetched for one range, in ascending block order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub range: BlockRange,
    pub logs: Vec<LogEntry>,
    pub failed: Vec<FailedRange>,
}

impl ChunkOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug)]
struct Pending {
    range: BlockRange,
    retries: u32,
    delay: Duration,
}

/// Fetches every log of `range`, retrying and bisecting according to
/// `policy`. Never fails: sub-ranges that cannot be fetched end up in
/// [`ChunkOutcome::failed`].
pub async fn fetch_range<F>(
    fetcher: &F,
    filter: &LogFilter,
    range: BlockRange,
    policy: &RetryPolicy,
) -> ChunkOutcome
where
    F: ChunkFetcher + ?Sized,
{
    let mut logs = Vec::new();
    let mut failed = Vec::new();

    // Processed LIFO so the left half of a split always goes first
    let mut worklist = vec![Pending {
        range,
        retries: policy.max_retries,
        delay: policy.base_delay,
    }];

    while let Some(Pending {
        range,
        retries,
        delay,
    }) = worklist.pop()
    {
        let error = match fetcher.fetch_logs(filter, range).await {
            Ok(entries) => {
                logs.extend(entries);
                continue;
            }
            Err(error) => error,
        };

        if error.is_transient() && retries > 0 {
            tracing::warn!(
                %range,
                retries_left = retries,
                ?delay,
                %error,
                "Transient failure, backing off"
            );
            metrics::increment_counter!("neda_scanner.controller.retry");

            tokio::time::sleep(delay).await;

            worklist.push(Pending {
                range,
                retries: retries - 1,
                delay: delay.saturating_mul(2),
            });
            continue;
        }

        if retries > 0 && range.width() > policy.min_split_width {
            if let Some((left, right)) = range.split() {
                tracing::info!(%range, %left, %right, %error, "Bisecting range");
                metrics::increment_counter!("neda_scanner.controller.bisect");

                for half in [right, left] {
                    worklist.push(Pending {
                        range: half,
                        retries: retries - 1,
                        delay,
                    });
                }
                continue;
            }
        }

        tracing::error!(%range, %error, "Failed to query logs after retries");
        metrics::increment_counter!("neda_scanner.controller.failed_range");

        failed.push(FailedRange {
            range,
            error: error.to_string(),
        });
    }

    dedup_logs(&mut logs);

    ChunkOutcome {
        range,
        logs,
        failed,
    }
}
