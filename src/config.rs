use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use ethers::types::Address;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::controller::RetryPolicy;

pub const CONFIG_PREFIX: &str = "NEDA";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// RPC endpoints used for log queries
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Chunking and retry settings of the log scanner
    #[serde(default)]
    pub scanner: ScannerConfig,
    /// Tokens accepted for payments, keyed by currency symbol
    #[serde(default = "default::tokens")]
    pub tokens: BTreeMap<String, TokenConfig>,
}

impl ServiceConfig {
    pub fn load(config_path: Option<&Path>) -> eyre::Result<Self> {
        let mut settings = config::Config::builder();

        if let Some(path) = config_path {
            settings =
                settings.add_source(config::File::from(path).required(true));
        }

        let settings = settings
            .add_source(
                config::Environment::with_prefix(CONFIG_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config = serde_path_to_error::deserialize(settings)?;

        Ok(config)
    }

    /// Looks up a token by currency symbol, ignoring case
    pub fn token(&self, symbol: &str) -> Option<&TokenConfig> {
        self.tokens
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(symbol))
            .map(|(_, token)| token)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            scanner: ScannerConfig::default(),
            tokens: default::tokens(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Ethereum RPC endpoints, one is picked at random for every request.
    /// Accepts a list or a comma separated string.
    #[serde(
        with = "crate::serde_utils::urls",
        default = "default::rpc_endpoints"
    )]
    pub rpc_endpoints: Vec<Url>,
    /// Upper bound on requests per second across all endpoints
    #[serde(default)]
    pub requests_per_second: Option<u32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            rpc_endpoints: default::rpc_endpoints(),
            requests_per_second: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Number of blocks per log query
    pub chunk_width: u64,
    /// Retry attempts before a range is bisected or given up on
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds, doubled on every retry
    pub base_delay_ms: u64,
    /// Ranges spanning this many blocks or fewer are never bisected
    pub min_split_width: u64,
    /// Pause between two consecutive chunk queries in milliseconds
    pub chunk_pause_ms: u64,
}

impl ScannerConfig {
    pub const fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub const fn chunk_pause(&self) -> Duration {
        Duration::from_millis(self.chunk_pause_ms)
    }

    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.base_delay(),
            min_split_width: self.min_split_width,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            chunk_width: default::chunk_width(),
            max_retries: default::max_retries(),
            base_delay_ms: default::base_delay_ms(),
            min_split_width: default::min_split_width(),
            chunk_pause_ms: default::chunk_pause_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenConfig {
    /// ERC-20 contract address
    pub address: Address,
    pub decimals: u8,
}

mod default {
    use super::*;

    const BASE_MAINNET_RPCS: [&str; 3] = [
        "https://mainnet.base.org/",
        "https://base-rpc.publicnode.com/",
        "https://base.llamarpc.com/",
    ];

    const BASE_TOKENS: [(&str, &str, u8); 4] = [
        ("USDC", "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", 6),
        ("USDbC", "0xd9aAEc86B65D86f6A7B5B1b0c42FFA531710b6CA", 6),
        ("DAI", "0x50c5725949A6F0c72E6C4a641F24049A917DB0Cb", 18),
        ("WETH", "0x4200000000000000000000000000000000000006", 18),
    ];

    pub fn rpc_endpoints() -> Vec<Url> {
        BASE_MAINNET_RPCS
            .iter()
            .map(|url| Url::parse(url).expect("Invalid default RPC endpoint"))
            .collect()
    }

    pub fn tokens() -> BTreeMap<String, TokenConfig> {
        BASE_TOKENS
            .iter()
            .map(|(symbol, address, decimals)| {
                let token = TokenConfig {
                    address: address
                        .parse()
                        .expect("Invalid default token address"),
                    decimals: *decimals,
                };
                (symbol.to_string(), token)
            })
            .collect()
    }

    pub const fn chunk_width() -> u64 {
        500
    }

    pub const fn max_retries() -> u32 {
        3
    }

    pub const fn base_delay_ms() -> u64 {
        1000
    }

    pub const fn min_split_width() -> u64 {
        100
    }

    pub const fn chunk_pause_ms() -> u64 {
        100
    }
}
