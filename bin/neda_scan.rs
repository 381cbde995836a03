use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use ethers::providers::Middleware;
use ethers::types::{Address, H256};
use neda_scanner::config::ServiceConfig;
use neda_scanner::payment::PaymentWatcher;
use neda_scanner::{
    init_provider, LogFilter, LogScanner, MiddlewareFetcher, ScanOptions,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Fetches contract event logs and detects merchant payments on an EVM chain.
/// Results are printed to stdout as JSON, logs go to stderr.
#[derive(Parser, Debug)]
#[clap(name = "NEDA log scanner")]
#[clap(version)]
struct Opts {
    /// Path to the configuration file
    #[clap(short, long, env = "NEDA_CONFIG")]
    config: Option<PathBuf>,

    /// Set to disable colors in the logs
    #[clap(long)]
    no_ansi: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch the logs emitted by a contract over a block range
    Logs {
        /// Contract address
        #[clap(long, value_parser = parse_address)]
        address: Address,

        /// Event signature hash to match
        #[clap(long, value_parser = parse_hash)]
        topic0: Option<H256>,

        #[clap(long)]
        from_block: u64,

        /// Defaults to the latest block
        #[clap(long)]
        to_block: Option<u64>,

        /// Blocks per query, overrides the configuration
        #[clap(long)]
        chunk_width: Option<u64>,

        #[clap(long)]
        max_retries: Option<u32>,

        #[clap(long)]
        base_delay_ms: Option<u64>,
    },
    /// Look for a transfer of an exact amount to a merchant
    Payment {
        /// Currency symbol of the token, e.g. USDC
        #[clap(long)]
        currency: String,

        #[clap(long, value_parser = parse_address)]
        merchant: Address,

        /// Amount in whole token units, e.g. 12.5
        #[clap(long)]
        amount: String,

        /// Number of recent blocks to search
        #[clap(long, default_value_t = 1000)]
        lookback: u64,
    },
    /// Check the confirmations of a known payment transaction
    Confirm {
        #[clap(long, value_parser = parse_hash)]
        tx_hash: H256,
    },
}

fn parse_address(s: &str) -> Result<Address, String> {
    s.parse().map_err(|e| format!("Invalid address {s}: {e}"))
}

fn parse_hash(s: &str) -> Result<H256, String> {
    s.parse().map_err(|e| format!("Invalid hash {s}: {e}"))
}

#[tokio::main]
pub async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    dotenv::dotenv().ok();

    let opts = Opts::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(!opts.no_ansi)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = ServiceConfig::load(opts.config.as_deref())?;

    tracing::info!(?config, "Starting NEDA log scanner");

    let provider = init_provider(&config.provider)?;

    match opts.command {
        Command::Logs {
            address,
            topic0,
            from_block,
            to_block,
            chunk_width,
            max_retries,
            base_delay_ms,
        } => {
            let to_block = match to_block {
                Some(to_block) => to_block,
                None => provider.get_block_number().await?.as_u64(),
            };

            let mut filter = LogFilter::for_address(address);
            if let Some(topic0) = topic0 {
                filter = filter.topic0(topic0);
            }

            let options = ScanOptions {
                chunk_width,
                max_retries,
                base_delay: base_delay_ms.map(Duration::from_millis),
            };

            let scanner =
                LogScanner::new(MiddlewareFetcher::new(provider), config.scanner);
            let report = scanner
                .scan_with(&filter, from_block, to_block, &options)
                .await?;

            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Payment {
            currency,
            merchant,
            amount,
            lookback,
        } => {
            let watcher = PaymentWatcher::new(provider, config);
            let payment = watcher
                .find_payment(&currency, merchant, &amount, lookback)
                .await?;

            println!("{}", serde_json::to_string_pretty(&payment)?);
        }
        Command::Confirm { tx_hash } => {
            let watcher = PaymentWatcher::new(provider, config);
            let confirmation = watcher.check_transaction(tx_hash).await?;

            println!("{}", serde_json::to_string_pretty(&confirmation)?);
        }
    }

    Ok(())
}
