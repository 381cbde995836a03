use ethers::providers::{JsonRpcError, MiddlewareError};
use thiserror::Error;

/// JSON-RPC error codes that endpoints use for throttling and overload
const TRANSIENT_RPC_CODES: [i64; 3] = [
    // Limit exceeded
    -32005,
    // Internal error
    -32603,
    // Too many requests
    429,
];

const TRANSIENT_MARKERS: [&str; 10] = [
    "timeout",
    "timed out",
    "rate limit",
    "ratelimit",
    "server_error",
    "too many requests",
    "service unavailable",
    "temporarily unavailable",
    "bad gateway",
    "internal server error",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Expected to succeed if the same query is retried later
    Transient,
    Persistent,
}

/// A failed log query, classified by whether retrying it can help
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn persistent(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Persistent,
            message: message.into(),
        }
    }

    /// Classifies an error by its message alone
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_transient_message(&message) {
            Self::transient(message)
        } else {
            Self::persistent(message)
        }
    }

    pub fn from_rpc_error(error: &JsonRpcError) -> Self {
        if TRANSIENT_RPC_CODES.contains(&error.code) {
            Self::transient(error.to_string())
        } else {
            Self::from_message(error.to_string())
        }
    }

    /// Classifies an error surfaced by an ethers middleware stack.
    ///
    /// The HTTP transport does not check status codes, so throttling and
    /// gateway errors arrive as responses that failed to deserialize. Their
    /// message carries the response body, which is classified like any
    /// other message. An empty or truncated body is transient.
    pub fn from_middleware<E: MiddlewareError>(error: &E) -> Self {
        if let Some(response) = error.as_error_response() {
            return Self::from_rpc_error(response);
        }

        if let Some(serde_error) = error.as_serde_error() {
            if serde_error.is_eof() {
                return Self::transient(error.to_string());
            }
        }

        Self::from_message(error.to_string())
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FetchErrorKind::Transient
    }
}

pub fn is_transient_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    TRANSIENT_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}

/// Invalid scan requests, rejected before any query is made
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Invalid block range: from block {from} is after to block {to}")]
    InvalidRange { from: u64, to: u64 },
    #[error("Log filter must match at least one contract address")]
    InvalidFilter,
    #[error("Chunk width must be greater than zero")]
    ZeroChunkWidth,
}

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("No token configured for currency {0}")]
    UnknownToken(String),
    #[error("Invalid payment amount {amount}: {reason}")]
    InvalidAmount { amount: String, reason: String },
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("Provider error: {0}")]
    Provider(String),
}
