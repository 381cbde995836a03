//! Chunked, retrying event log scanner for EVM chains.
//!
//! [`LogScanner`] fetches the logs matching a [`LogFilter`] over a block
//! range. The range is split into fixed-size chunks that are queried in
//! order; failing chunks are retried with exponential backoff and bisected
//! until the failure is isolated to a narrow sub-range, which is then skipped
//! and reported in the [`ScanReport`].

use std::num::NonZeroU32;
use std::sync::Arc;

use ethers::providers::{Http, Provider};
use ethers_rotation::RotatingClient;

use self::config::ProviderConfig;

pub mod abi;
pub mod config;
pub mod controller;
pub mod error;
pub mod fetcher;
pub mod payment;
pub mod scanner;
pub mod serde_utils;
pub mod types;

pub use self::controller::{ChunkOutcome, FailedRange, RetryPolicy};
pub use self::error::{FetchError, FetchErrorKind, PaymentError, ScanError};
pub use self::fetcher::{ChunkFetcher, MiddlewareFetcher};
pub use self::scanner::{LogScanner, ScanOptions, ScanReport};
pub use self::types::{BlockRange, LogEntry, LogFilter};

pub type RpcProvider = Provider<RotatingClient<Http>>;

/// Builds a provider that spreads requests over all configured endpoints
pub fn init_provider(
    config: &ProviderConfig,
) -> eyre::Result<Arc<RpcProvider>> {
    let clients: Vec<Http> = config
        .rpc_endpoints
        .iter()
        .cloned()
        .map(Http::new)
        .collect();

    let mut client = RotatingClient::new(clients)?;

    if let Some(requests_per_second) =
        config.requests_per_second.and_then(NonZeroU32::new)
    {
        tracing::info!(
            requests_per_second = requests_per_second.get(),
            "Throttling RPC requests"
        );
        client = client.with_throttle(requests_per_second, None);
    }

    tracing::info!(endpoints = client.len(), "Initialized RPC provider");

    Ok(Arc::new(Provider::new(client)))
}
