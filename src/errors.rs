//! Error taxonomy for the connector.
//!
//! Mirrors FFCAPI's `(response, reason, error)` triple: every public operation
//! returns a [`ConnectorError`] which carries both a human-readable message and a
//! coarse [`ErrorReason`] the framework can branch on without string-matching.

use thiserror::Error;

/// Cross-blockchain reason tag the framework uses to decide whether/how to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorReason {
    /// No specific reason - bubble the raw error up to the caller.
    #[default]
    None,
    InvalidInputs,
    NotFound,
    NonceTooLow,
    TransactionReverted,
}

impl ErrorReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorReason::None => "",
            ErrorReason::InvalidInputs => "InvalidInputs",
            ErrorReason::NotFound => "NotFound",
            ErrorReason::NonceTooLow => "NonceTooLow",
            ErrorReason::TransactionReverted => "TransactionReverted",
        }
    }
}

/// Fatal misconfiguration codes, carried over from the original connector's `FF...`
/// error-code convention so operators can grep logs the same way.
pub mod config_codes {
    pub const MISSING_RPC_URL: &str = "FF23051";
    pub const MISSING_RPC_URL_LEGACY: &str = "FF23025";
    pub const INVALID_CACHE_SIZE: &str = "FF23040";
    pub const INVALID_DATA_FORMAT: &str = "FF23032";
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("invalid inputs: {0}")]
    InvalidInputs(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("nonce too low: {0}")]
    NonceTooLow(String),

    #[error("transaction reverted: {0}")]
    TransactionReverted(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ConnectorError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            ConnectorError::InvalidInputs(_) => ErrorReason::InvalidInputs,
            ConnectorError::NotFound(_) => ErrorReason::NotFound,
            ConnectorError::NonceTooLow(_) => ErrorReason::NonceTooLow,
            ConnectorError::TransactionReverted(_) => ErrorReason::TransactionReverted,
            ConnectorError::Other(_) => ErrorReason::None,
        }
    }
}

/// Maps a raw Tezos node/signer error string to a [`ErrorReason`], per the
/// method category it was raised from. Pure function - easy to unit test against
/// the literal substrings the node is known to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcMethodCategory {
    Block,
    Send,
}

pub fn map_error(category: RpcMethodCategory, err: &str) -> ErrorReason {
    let lower = err.to_lowercase();
    match category {
        RpcMethodCategory::Block => {
            if lower.contains("status 404") {
                return ErrorReason::NotFound;
            }
        }
        RpcMethodCategory::Send => {
            if lower.contains("counter_in_the_past") {
                return ErrorReason::NonceTooLow;
            }
        }
    }
    ErrorReason::None
}
