#![allow(unused)]

use std::sync::Mutex;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256};
use neda_scanner::{
    BlockRange, ChunkFetcher, FetchError, LogEntry, LogFilter,
};

type FailureRule =
    Box<dyn Fn(BlockRange, usize) -> Option<FetchError> + Send + Sync>;

/// An in-memory log source that can be told to fail for some ranges.
///
/// Every listed block carries two logs emitted by the same transaction.
pub struct MockChain {
    logs: Vec<LogEntry>,
    rule: FailureRule,
    overlap: bool,
    calls: Mutex<Vec<BlockRange>>,
}

impl MockChain {
    pub fn with_logs_at(blocks: impl IntoIterator<Item = u64>) -> Self {
        let logs = blocks
            .into_iter()
            .flat_map(|block| [log(block, 0), log(block, 1)])
            .collect();

        Self {
            logs,
            rule: Box::new(|_, _| None),
            overlap: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `rule` receives the queried range and how many times it has been
    /// queried so far, including the current call
    pub fn failing_when<R>(mut self, rule: R) -> Self
    where
        R: Fn(BlockRange, usize) -> Option<FetchError> + Send + Sync + 'static,
    {
        self.rule = Box::new(rule);
        self
    }

    /// Answers every query as if it started one block earlier, the way some
    /// endpoints treat range bounds
    pub fn overlapping(mut self) -> Self {
        self.overlap = true;
        self
    }

    pub fn calls(&self) -> Vec<BlockRange> {
        self.calls.lock().unwrap().clone()
    }

    pub fn logs_in(&self, from: u64, to: u64) -> Vec<LogEntry> {
        self.logs
            .iter()
            .filter(|log| from <= log.block_number && log.block_number <= to)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChunkFetcher for MockChain {
    async fn fetch_logs(
        &self,
        _filter: &LogFilter,
        range: BlockRange,
    ) -> Result<Vec<LogEntry>, FetchError> {
        let attempt = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(range);
            calls.iter().filter(|r| **r == range).count()
        };

        if let Some(error) = (self.rule)(range, attempt) {
            return Err(error);
        }

        let from = if self.overlap {
            range.start().saturating_sub(1)
        } else {
            range.start()
        };

        Ok(self.logs_in(from, range.end()))
    }
}

pub fn log(block: u64, log_index: u64) -> LogEntry {
    LogEntry {
        block_number: block,
        transaction_hash: H256::from_low_u64_be(block),
        transaction_index: Some(0),
        log_index,
        address: contract(),
        topics: vec![H256::repeat_byte(0x11)],
        data: Bytes::default(),
    }
}

pub fn contract() -> Address {
    Address::repeat_byte(0x42)
}

pub fn filter() -> LogFilter {
    LogFilter::for_address(contract())
}

pub fn range(from: u64, to: u64) -> BlockRange {
    BlockRange::new(from, to).unwrap()
}
