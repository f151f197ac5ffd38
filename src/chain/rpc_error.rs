//! Structured classification of Solana RPC failures
//!
//! Submission failures are sorted into transient (rebuild and retry with a fresh
//! blockhash) and permanent (record the batch as failed). Classification prefers
//! structured data from `solana_client`: HTTP status codes, JSON-RPC error codes and
//! `TransactionError` variants. When only a message string is available the
//! decision falls through to [`classify_message`], the single place where message
//! text is inspected.

use serde::Serialize;
use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::rpc_custom_error::{
    JSON_RPC_SERVER_ERROR_SEND_TRANSACTION_PREFLIGHT_FAILURE,
    JSON_RPC_SERVER_ERROR_TRANSACTION_SIGNATURE_LEN_MISMATCH,
    JSON_RPC_SERVER_ERROR_TRANSACTION_SIGNATURE_VERIFICATION_FAILURE,
    JSON_RPC_SERVER_ERROR_UNSUPPORTED_TRANSACTION_VERSION,
};
use solana_client::rpc_request::{RpcError as RpcRequestError, RpcResponseErrorData};
use solana_sdk::transaction::TransactionError;
use thiserror::Error;

/// Errors returned by the chain RPC collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RpcError {
    /// Connection reset, DNS failure, request timeout without a status
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP 429 or an equivalent provider throttle
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The transaction references a blockhash the cluster no longer knows
    #[error("Blockhash not found or expired: {0}")]
    BlockhashNotFound(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Malformed instruction, bad signature, unsupported version
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Transaction already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// Anything the classifier could not place
    #[error("RPC error: {0}")]
    Rpc(String),
}

impl RpcError {
    /// Whether a failed submission is worth rebuilding and re-sending.
    ///
    /// Only a stale blockhash and upstream throttling qualify. Every other submit
    /// failure is permanent for the batch that produced it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::BlockhashNotFound(_) | RpcError::RateLimited(_)
        )
    }

    /// Short label for metrics and reports
    pub fn kind(&self) -> &'static str {
        match self {
            RpcError::Network(_) => "network",
            RpcError::RateLimited(_) => "rate_limited",
            RpcError::BlockhashNotFound(_) => "blockhash_not_found",
            RpcError::InsufficientFunds(_) => "insufficient_funds",
            RpcError::InvalidTransaction(_) => "invalid_transaction",
            RpcError::AlreadyProcessed(_) => "already_processed",
            RpcError::Timeout(_) => "timeout",
            RpcError::Rpc(_) => "rpc",
        }
    }

    /// Classify a `solana_client` error.
    pub fn from_client_error(error: &ClientError) -> Self {
        let text = error.to_string();
        match error.kind() {
            ClientErrorKind::Io(_) => RpcError::Network(text),
            ClientErrorKind::Reqwest(reqwest_err) => match reqwest_err.status() {
                Some(status) if status.as_u16() == 429 => RpcError::RateLimited(text),
                Some(status) => classify_message(&format!("HTTP {}: {}", status.as_u16(), text)),
                None if reqwest_err.is_timeout() => RpcError::Timeout(text),
                None => RpcError::Network(text),
            },
            ClientErrorKind::TransactionError(tx_error) => Self::from_transaction_error(tx_error, text),
            ClientErrorKind::RpcError(RpcRequestError::RpcResponseError { code, data, .. }) => {
                Self::from_response_error(*code, data, text)
            }
            _ => classify_message(&text),
        }
    }

    /// Classify a JSON-RPC error response by its code. A preflight failure
    /// carries the simulated `TransactionError`, which decides the outcome.
    fn from_response_error(code: i64, data: &RpcResponseErrorData, text: String) -> Self {
        match (code, data) {
            (
                JSON_RPC_SERVER_ERROR_SEND_TRANSACTION_PREFLIGHT_FAILURE,
                RpcResponseErrorData::SendTransactionPreflightFailure(simulation),
            ) => match &simulation.err {
                Some(tx_error) => Self::from_transaction_error(tx_error, text),
                None => classify_message(&text),
            },
            (
                JSON_RPC_SERVER_ERROR_TRANSACTION_SIGNATURE_VERIFICATION_FAILURE
                | JSON_RPC_SERVER_ERROR_TRANSACTION_SIGNATURE_LEN_MISMATCH
                | JSON_RPC_SERVER_ERROR_UNSUPPORTED_TRANSACTION_VERSION,
                _,
            ) => RpcError::InvalidTransaction(text),
            _ => classify_message(&text),
        }
    }

    fn from_transaction_error(tx_error: &TransactionError, text: String) -> Self {
        match tx_error {
            TransactionError::BlockhashNotFound => RpcError::BlockhashNotFound(text),
            TransactionError::InsufficientFundsForFee
            | TransactionError::InsufficientFundsForRent { .. } => {
                RpcError::InsufficientFunds(text)
            }
            TransactionError::AlreadyProcessed => RpcError::AlreadyProcessed(text),
            _ => RpcError::InvalidTransaction(text),
        }
    }
}

/// Classify an error known only by its message.
///
/// Heuristic: matches lowercase substrings that RPC providers put in their error
/// bodies. `"blockhash not found"` and `"429"` mark the two transient cases; the
/// rest are labelled for diagnostics and treated as permanent.
pub fn classify_message(message: &str) -> RpcError {
    let lower = message.to_lowercase();
    let owned = message.to_string();

    if lower.contains("blockhash not found") || lower.contains("blockhashnotfound") {
        RpcError::BlockhashNotFound(owned)
    } else if lower.contains("429") || lower.contains("too many requests") {
        RpcError::RateLimited(owned)
    } else if lower.contains("insufficient funds") || lower.contains("insufficient lamports") {
        RpcError::InsufficientFunds(owned)
    } else if lower.contains("already processed") || lower.contains("already been processed") {
        RpcError::AlreadyProcessed(owned)
    } else if lower.contains("invalid") || lower.contains("malformed") {
        RpcError::InvalidTransaction(owned)
    } else {
        RpcError::Rpc(owned)
    }
}

impl From<ClientError> for RpcError {
    fn from(error: ClientError) -> Self {
        RpcError::from_client_error(&error)
    }
}
