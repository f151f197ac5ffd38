//! Chain module - the Solana collaborators the approval engine talks to
//!
//! This module provides:
//! - The `SolanaRpc` request/response surface used by the engine
//! - An RPC-backed provider with endpoint failover
//! - Structured classification of RPC failures
//! - Confirmation level policy
//! - Owned NFT discovery by collection, creator or owner

pub mod discovery;
pub mod finality;
pub mod provider;
pub mod rpc_error;

pub use discovery::{AssetDiscovery, DiscoveryFilter};
pub use finality::ConfirmationLevel;
pub use provider::ChainProvider;
pub use rpc_error::RpcError;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Serialize, Serializer};
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::{ParsePubkeyError, Pubkey};
use solana_sdk::signature::Signature;
use solana_sdk::transaction::{Transaction, TransactionError};
use std::fmt;
use std::str::FromStr;

/// Mint address of a single NFT
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId(Pubkey);

impl AssetId {
    pub fn new(mint: Pubkey) -> Self {
        Self(mint)
    }

    pub fn mint(&self) -> &Pubkey {
        &self.0
    }
}

impl FromStr for AssetId {
    type Err = ParsePubkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pubkey::from_str(s.trim()).map(AssetId)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for AssetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

/// Submission flags passed through to `sendTransaction`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    pub skip_preflight: bool,
    /// Node-side rebroadcast attempts; `Some(0)` leaves retries to the caller
    pub max_retries: Option<usize>,
}

impl SendOptions {
    /// No simulation and no node-side rebroadcast. The engine owns retries.
    pub fn engine_managed() -> Self {
        Self {
            skip_preflight: true,
            max_retries: Some(0),
        }
    }
}

/// Outcome of a confirmation poll that reached the requested level
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Confirmation {
    /// Execution error recorded on chain, if the transaction failed
    pub err: Option<TransactionError>,
}

impl Confirmation {
    pub fn succeeded(&self) -> bool {
        self.err.is_none()
    }
}

/// Request/response surface of the chain RPC used by the engine.
///
/// Implementations must be safe to call from many in-flight futures at once.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait SolanaRpc: Send + Sync {
    /// Fetch a fresh blockhash for a new transaction.
    async fn get_latest_blockhash(&self) -> Result<Hash, RpcError>;

    /// Submit a signed transaction.
    async fn send_raw_transaction(
        &self,
        transaction: &Transaction,
        options: SendOptions,
    ) -> Result<Signature, RpcError>;

    /// Wait until `signature` reaches `level` or fails, bounded by the
    /// implementation's own timeout.
    async fn confirm_transaction(
        &self,
        signature: &Signature,
        level: ConfirmationLevel,
    ) -> Result<Confirmation, RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_id_parse_and_display() {
        let mint = Pubkey::new_unique();
        let parsed: AssetId = format!("  {}\n", mint).parse().unwrap();
        assert_eq!(parsed.mint(), &mint);
        assert_eq!(parsed.to_string(), mint.to_string());
        assert!("not-a-key".parse::<AssetId>().is_err());
    }

    #[test]
    fn test_asset_id_serializes_as_base58() {
        let mint = Pubkey::new_unique();
        let json = serde_json::to_string(&AssetId::new(mint)).unwrap();
        assert_eq!(json, format!("\"{}\"", mint));
    }
}
