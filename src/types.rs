use std::collections::HashSet;
use std::num::NonZeroU64;

use ethers::abi::RawLog;
use ethers::types::{
    Address, BlockNumber, Bytes, Filter, Log, ValueOrArray, H256,
};
use serde::{Deserialize, Serialize};

use crate::error::{FetchError, ScanError};

/// A closed, non-empty interval of block numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlockRange {
    from: u64,
    to: u64,
}

impl BlockRange {
    pub const fn new(from: u64, to: u64) -> Result<Self, ScanError> {
        if from > to {
            return Err(ScanError::InvalidRange { from, to });
        }

        Ok(Self { from, to })
    }

    pub const fn start(&self) -> u64 {
        self.from
    }

    pub const fn end(&self) -> u64 {
        self.to
    }

    /// Number of blocks in the range, saturating at `u64::MAX`
    pub const fn block_count(&self) -> u64 {
        (self.to - self.from).saturating_add(1)
    }

    /// Distance between the first and the last block
    pub const fn width(&self) -> u64 {
        self.to - self.from
    }

    pub const fn contains(&self, block: u64) -> bool {
        self.from <= block && block <= self.to
    }

    pub const fn overlaps(&self, other: &BlockRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }

    /// Splits the range at `floor((from + to) / 2)` into two adjacent
    /// halves. Single block ranges cannot be split.
    pub const fn split(&self) -> Option<(BlockRange, BlockRange)> {
        if self.from == self.to {
            return None;
        }

        let mid = self.from + (self.to - self.from) / 2;

        Some((
            BlockRange {
                from: self.from,
                to: mid,
            },
            BlockRange {
                from: mid + 1,
                to: self.to,
            },
        ))
    }

    /// Iterates over contiguous sub-ranges of `width` blocks each, in
    /// ascending order. The last chunk is shorter when the range is not a
    /// multiple of `width`.
    pub const fn chunks(&self, width: NonZeroU64) -> Chunks {
        Chunks {
            next: Some(self.from),
            to: self.to,
            width: width.get(),
        }
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

#[derive(Debug, Clone)]
pub struct Chunks {
    next: Option<u64>,
    to: u64,
    width: u64,
}

impl Iterator for Chunks {
    type Item = BlockRange;

    fn next(&mut self) -> Option<Self::Item> {
        let from = self.next?;
        let to = from.saturating_add(self.width - 1).min(self.to);

        self.next = if to < self.to { Some(to + 1) } else { None };

        Some(BlockRange { from, to })
    }
}

/// Address and topic predicate for the logs of a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter(Filter);

impl LogFilter {
    /// Wraps a filter. Any block range set on it is replaced per query.
    pub fn new(filter: Filter) -> Result<Self, ScanError> {
        match &filter.address {
            None => Err(ScanError::InvalidFilter),
            Some(ValueOrArray::Array(addresses)) if addresses.is_empty() => {
                Err(ScanError::InvalidFilter)
            }
            Some(_) => Ok(Self(filter)),
        }
    }

    pub fn for_address(address: Address) -> Self {
        Self(Filter::new().address(address))
    }

    pub fn topic0(self, topic: H256) -> Self {
        Self(self.0.topic0(ValueOrArray::Value(topic)))
    }

    pub fn topic1(self, topic: H256) -> Self {
        Self(self.0.topic1(ValueOrArray::Value(topic)))
    }

    pub fn topic2(self, topic: H256) -> Self {
        Self(self.0.topic2(ValueOrArray::Value(topic)))
    }

    /// The `eth_getLogs` filter for one bounded range
    pub fn for_range(&self, range: BlockRange) -> Filter {
        self.0
            .clone()
            .from_block(BlockNumber::Number(range.start().into()))
            .to_block(BlockNumber::Number(range.end().into()))
    }

    pub fn inner(&self) -> &Filter {
        &self.0
    }
}

/// One matched on-chain event occurrence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub block_number: u64,
    pub transaction_hash: H256,
    pub transaction_index: Option<u64>,
    pub log_index: u64,
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Bytes,
}

impl LogEntry {
    /// Identifies the log across overlapping queries
    pub fn key(&self) -> (H256, u64) {
        (self.transaction_hash, self.log_index)
    }

    /// Position of the log on chain
    pub fn position(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

impl TryFrom<Log> for LogEntry {
    type Error = FetchError;

    fn try_from(log: Log) -> Result<Self, Self::Error> {
        let block_number = log
            .block_number
            .ok_or_else(|| FetchError::persistent("Log has no block number"))?
            .as_u64();
        let transaction_hash = log.transaction_hash.ok_or_else(|| {
            FetchError::persistent("Log has no transaction hash")
        })?;
        let log_index = log
            .log_index
            .ok_or_else(|| FetchError::persistent("Log has no log index"))?;

        if log_index.bits() > 64 {
            return Err(FetchError::persistent(format!(
                "Log index {log_index} out of range"
            )));
        }

        Ok(Self {
            block_number,
            transaction_hash,
            transaction_index: log.transaction_index.map(|i| i.as_u64()),
            log_index: log_index.low_u64(),
            address: log.address,
            topics: log.topics,
            data: log.data,
        })
    }
}

impl From<&LogEntry> for RawLog {
    fn from(entry: &LogEntry) -> Self {
        RawLog {
            topics: entry.topics.clone(),
            data: entry.data.to_vec(),
        }
    }
}

/// Drops every log whose key was already seen, keeping the first
/// occurrence and the relative order of the rest.
pub fn dedup_logs(logs: &mut Vec<LogEntry>) {
    let mut seen = HashSet::with_capacity(logs.len());
    logs.retain(|log| seen.insert(log.key()));
}
