//! Diagnostic events emitted while a run progresses
//!
//! Events are a side channel for progress display and telemetry. They never
//! influence control flow, and a run completes whether or not anyone listens.

use crate::chain::AssetId;

use serde::Serialize;
use solana_sdk::signature::Signature;

/// Progress events broadcast by the approval engine
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A chunk entered its retry state machine
    ChunkStarted {
        chunk: usize,
        assets: usize,
        batches: usize,
    },

    /// The signer was asked to sign one attempt's transactions
    SigningRequested {
        chunk: usize,
        attempt: u32,
        transactions: usize,
    },

    /// A batch reached the configured confirmation level
    BatchConfirmed {
        chunk: usize,
        attempt: u32,
        #[serde(serialize_with = "serialize_signature")]
        signature: Signature,
        assets: usize,
    },

    /// A batch will be rebuilt in the next attempt
    BatchRetrying {
        chunk: usize,
        attempt: u32,
        assets: usize,
        reason: String,
    },

    /// A batch is out of the run; its assets are reported as failed
    BatchFailed {
        chunk: usize,
        attempt: u32,
        asset_ids: Vec<AssetId>,
        reason: String,
    },

    /// A chunk reached a terminal state for every batch
    ChunkFinished {
        chunk: usize,
        confirmed: usize,
        failed_assets: usize,
        attempts: u32,
    },
}

fn serialize_signature<S: serde::Serializer>(
    signature: &Signature,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(signature)
}

impl EngineEvent {
    /// Chunk this event belongs to
    pub fn chunk(&self) -> usize {
        match self {
            EngineEvent::ChunkStarted { chunk, .. } => *chunk,
            EngineEvent::SigningRequested { chunk, .. } => *chunk,
            EngineEvent::BatchConfirmed { chunk, .. } => *chunk,
            EngineEvent::BatchRetrying { chunk, .. } => *chunk,
            EngineEvent::BatchFailed { chunk, .. } => *chunk,
            EngineEvent::ChunkFinished { chunk, .. } => *chunk,
        }
    }

    /// Get event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::ChunkStarted { .. } => "chunk_started",
            EngineEvent::SigningRequested { .. } => "signing_requested",
            EngineEvent::BatchConfirmed { .. } => "batch_confirmed",
            EngineEvent::BatchRetrying { .. } => "batch_retrying",
            EngineEvent::BatchFailed { .. } => "batch_failed",
            EngineEvent::ChunkFinished { .. } => "chunk_finished",
        }
    }
}
