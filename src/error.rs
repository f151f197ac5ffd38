//! Error types for the collection delegate approver

use crate::chain::RpcError;
use crate::tx::SignerError;

use thiserror::Error;

/// Main error type for the approver
#[derive(Error, Debug)]
pub enum ApproverError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("Signing error: {0}")]
    Signing(#[from] SignerError),

    #[error("Failed to build transaction for chunk {chunk}: {message}")]
    Build { chunk: usize, message: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

/// Result type for approver operations
pub type ApproverResult<T> = Result<T, ApproverError>;
