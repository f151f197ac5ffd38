//! Confirmation levels for submitted approval transactions
//!
//! Solana reports three finality tiers for a signature:
//! - Processed: seen by the connected node in a block, can still be rolled back
//! - Confirmed: voted on by a supermajority of stake
//! - Finalized: rooted, irreversible
//!
//! The engine defaults to `Processed` to keep the confirm phase short. A batch
//! reported as confirmed at that level can still disappear in a fork switch, so
//! callers that need certainty should configure `confirmed` or `finalized`.

use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;
use std::fmt;

/// Finality tier polled by the confirm phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmationLevel {
    #[default]
    Processed,
    Confirmed,
    Finalized,
}

impl ConfirmationLevel {
    pub fn commitment(self) -> CommitmentConfig {
        match self {
            ConfirmationLevel::Processed => CommitmentConfig::processed(),
            ConfirmationLevel::Confirmed => CommitmentConfig::confirmed(),
            ConfirmationLevel::Finalized => CommitmentConfig::finalized(),
        }
    }

    /// Whether a result at this level can still be invalidated by a reorg
    pub fn is_reversible(self) -> bool {
        self != ConfirmationLevel::Finalized
    }
}

impl fmt::Display for ConfirmationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfirmationLevel::Processed => "processed",
            ConfirmationLevel::Confirmed => "confirmed",
            ConfirmationLevel::Finalized => "finalized",
        };
        f.write_str(name)
    }
}
