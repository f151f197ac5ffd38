//! Batch authorization engine
//!
//! The engine:
//! 1. Splits asset ids into chunks and batches
//! 2. Builds one approve transaction per batch with a fresh blockhash
//! 3. Asks the signer once per chunk attempt for every outstanding transaction
//! 4. Submits and confirms the signed transactions concurrently
//! 5. Rebuilds and re-signs the retryable subset until retries run out

pub mod approval;
pub mod batching;
pub mod chunk;
pub mod classify;

pub use approval::Engine;

use crate::chain::AssetId;
use chunk::ChunkState;

use futures::stream::{self, StreamExt};
use serde::{Serialize, Serializer};
use solana_sdk::signature::Signature;
use std::future::Future;

/// A confirmed transaction and the assets it approved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmedBatch {
    #[serde(serialize_with = "serialize_signature")]
    pub signature: Signature,
    pub asset_ids: Vec<AssetId>,
}

/// Outcome of one engine run.
///
/// Every input asset id appears in exactly one confirmed batch or in
/// `failed_asset_ids`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunResult {
    /// Confirmed signatures in confirmation-completion order
    #[serde(serialize_with = "serialize_signatures")]
    pub signatures: Vec<Signature>,
    pub failed_asset_ids: Vec<AssetId>,
    pub confirmed_batches: Vec<ConfirmedBatch>,
}

impl RunResult {
    pub fn approved_count(&self) -> usize {
        self.confirmed_batches.iter().map(|b| b.asset_ids.len()).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.failed_asset_ids.len()
    }

    /// Fold a finished chunk into the run totals
    pub(crate) fn absorb(&mut self, state: ChunkState) {
        self.signatures
            .extend(state.confirmed.iter().map(|batch| batch.signature));
        self.confirmed_batches.extend(state.confirmed);
        self.failed_asset_ids.extend(state.failed);
    }
}

fn serialize_signature<S: Serializer>(signature: &Signature, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(signature)
}

fn serialize_signatures<S: Serializer>(
    signatures: &[Signature],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(signatures.iter().map(|s| s.to_string()))
}

/// Drive `futures` jointly in the calling task, at most `limit` at a time.
///
/// Results come back in completion order. With no limit every future is polled
/// at once.
pub(crate) async fn join_bounded<F, T>(futures: impl IntoIterator<Item = F>, limit: Option<usize>) -> Vec<T>
where
    F: Future<Output = T>,
{
    let futures: Vec<F> = futures.into_iter().collect();
    let limit = limit.unwrap_or(futures.len()).max(1);
    stream::iter(futures).buffer_unordered(limit).collect().await
}
