//! Payment detection for merchants.
//!
//! A payment is an ERC-20 `Transfer` to the merchant whose value equals the
//! expected amount. Transfers are found by scanning a window of recent
//! blocks for `Transfer` logs addressed to the merchant. A payment whose
//! transaction hash is already known is confirmed through its receipt.

use std::sync::Arc;

use ethers::abi::RawLog;
use ethers::contract::EthEvent;
use ethers::providers::Middleware;
use ethers::types::{Address, H256, U256};
use serde::Serialize;

use crate::abi::TransferFilter;
use crate::config::ServiceConfig;
use crate::error::PaymentError;
use crate::fetcher::MiddlewareFetcher;
use crate::scanner::LogScanner;
use crate::types::{LogEntry, LogFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Included in a block, but not yet buried under another one
    Pending,
    Paid,
}

impl PaymentStatus {
    pub const fn from_confirmations(confirmations: u64) -> Self {
        if confirmations > 1 {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Pending
        }
    }
}

/// A decoded ERC-20 transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transfer {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub transaction_hash: H256,
    pub block_number: u64,
}

impl TryFrom<&LogEntry> for Transfer {
    type Error = ethers::abi::Error;

    fn try_from(entry: &LogEntry) -> Result<Self, Self::Error> {
        let event = TransferFilter::decode_log(&RawLog::from(entry))?;

        Ok(Self {
            token: entry.address,
            from: event.from,
            to: event.to,
            value: event.value,
            transaction_hash: entry.transaction_hash,
            block_number: entry.block_number,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Payment {
    pub currency: String,
    #[serde(flatten)]
    pub transfer: Transfer,
    pub confirmations: u64,
    pub status: PaymentStatus,
}

/// Receipt-based status of a known payment transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Confirmation {
    pub transaction_hash: H256,
    pub block_number: Option<u64>,
    pub confirmations: u64,
    pub status: PaymentStatus,
}

/// Blocks on top of and including `block`, or zero while it is not mined
pub fn confirmations(latest: u64, block: Option<u64>) -> u64 {
    match block {
        Some(block) if block <= latest => (latest - block).saturating_add(1),
        // Mined after the head we know about
        Some(_) => 1,
        None => 0,
    }
}

/// Matches `Transfer` logs of `token` sent to `merchant`
pub fn transfer_filter(token: Address, merchant: Address) -> LogFilter {
    LogFilter::for_address(token)
        .topic0(TransferFilter::signature())
        .topic2(H256::from(merchant))
}

/// Decodes the logs that are well formed transfers, skipping the rest
pub fn decode_transfers(logs: &[LogEntry]) -> Vec<Transfer> {
    logs.iter()
        .filter_map(|entry| match Transfer::try_from(entry) {
            Ok(transfer) => Some(transfer),
            Err(error) => {
                tracing::debug!(
                    tx_hash = ?entry.transaction_hash,
                    %error,
                    "Skipping log that is not a transfer"
                );
                None
            }
        })
        .collect()
}

/// The earliest transfer of exactly `amount`
pub fn match_transfer(
    transfers: &[Transfer],
    amount: U256,
) -> Option<&Transfer> {
    transfers.iter().find(|transfer| transfer.value == amount)
}

/// Parses a decimal amount such as `"12.5"` into base token units
pub fn parse_amount(
    amount: &str,
    decimals: u8,
) -> Result<U256, PaymentError> {
    let invalid = |reason: &str| PaymentError::InvalidAmount {
        amount: amount.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = amount.trim();
    if trimmed.starts_with('-') {
        return Err(invalid("amount must not be negative"));
    }

    let units = ethers::utils::parse_units(trimmed, u32::from(decimals))
        .map_err(|e| invalid(&e.to_string()))?;
    let value = U256::from(units);

    if value.is_zero() {
        return Err(invalid("amount must be greater than zero"));
    }

    Ok(value)
}

/// Looks for a merchant's incoming payments on chain
#[derive(Debug)]
pub struct PaymentWatcher<M: Middleware> {
    scanner: LogScanner<MiddlewareFetcher<M>>,
    config: ServiceConfig,
}

impl<M> PaymentWatcher<M>
where
    M: Middleware + 'static,
{
    pub fn new(middleware: Arc<M>, config: ServiceConfig) -> Self {
        let scanner =
            LogScanner::new(MiddlewareFetcher::new(middleware), config.scanner);

        Self { scanner, config }
    }

    /// Searches the last `lookback` blocks for a transfer of `amount`
    /// `currency` to `merchant`.
    ///
    /// Returns `None` when no matching transfer was found. Parts of the window
    /// may have been unreachable, in which case a warning is logged and the
    /// search result only covers the blocks that could be fetched.
    #[tracing::instrument(skip(self))]
    pub async fn find_payment(
        &self,
        currency: &str,
        merchant: Address,
        amount: &str,
        lookback: u64,
    ) -> Result<Option<Payment>, PaymentError> {
        let token = self
            .config
            .token(currency)
            .ok_or_else(|| PaymentError::UnknownToken(currency.to_string()))?;
        let expected = parse_amount(amount, token.decimals)?;

        let latest = self
            .scanner
            .fetcher()
            .middleware()
            .get_block_number()
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))?
            .as_u64();

        let filter = transfer_filter(token.address, merchant);
        let report = self
            .scanner
            .scan(&filter, latest.saturating_sub(lookback), latest)
            .await?;

        if !report.is_complete() {
            tracing::warn!(
                missing_blocks = report.missing_blocks(),
                "Payment search window was not fully scanned"
            );
        }

        let transfers = decode_transfers(&report.logs);
        let Some(transfer) = match_transfer(&transfers, expected) else {
            return Ok(None);
        };

        let confirmations = confirmations(latest, Some(transfer.block_number));

        Ok(Some(Payment {
            currency: currency.to_string(),
            transfer: transfer.clone(),
            confirmations,
            status: PaymentStatus::from_confirmations(confirmations),
        }))
    }

    /// Looks up the receipt of a payment transaction.
    ///
    /// Returns `None` when the endpoint knows no receipt for `tx_hash`.
    #[tracing::instrument(skip(self))]
    pub async fn check_transaction(
        &self,
        tx_hash: H256,
    ) -> Result<Option<Confirmation>, PaymentError> {
        let middleware = self.scanner.fetcher().middleware();

        let Some(receipt) = middleware
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| PaymentError::Provider(e.to_string()))?
        else {
            return Ok(None);
        };

        let block_number = receipt.block_number.map(|block| block.as_u64());
        let confirmations = match block_number {
            Some(_) => {
                let latest = middleware
                    .get_block_number()
                    .await
                    .map_err(|e| PaymentError::Provider(e.to_string()))?
                    .as_u64();
                confirmations(latest, block_number)
            }
            None => 0,
        };

        let status = PaymentStatus::from_confirmations(confirmations);
        tracing::info!(confirmations, ?status, "Checked payment transaction");

        Ok(Some(Confirmation {
            transaction_hash: tx_hash,
            block_number,
            confirmations,
            status,
        }))
    }
}
