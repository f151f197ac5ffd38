//! Per-chunk retry state machine
//!
//! Each attempt moves a chunk through
//! `Pending -> Built -> Signing -> Submitting -> Confirming` and back to `Pending`
//! while retryable batches remain, or on to `Done`. A build, signing or
//! state-transition error ends the chunk with every outstanding batch failed.

use super::batching::{Batch, Chunk};
use super::classify::{classify, BatchOutcome};
use super::{join_bounded, ConfirmedBatch};
use crate::chain::{AssetId, Confirmation, RpcError, SolanaRpc};
use crate::config::EngineConfig;
use crate::error::{ApproverError, ApproverResult};
use crate::events::EngineEvent;
use crate::metrics;
use crate::tx::{BatchSigner, SignerError, TransactionBuilder, TransactionSender};

use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use std::fmt;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Phase of a chunk within the current attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPhase {
    Pending,
    Built,
    Signing,
    Submitting,
    Confirming,
    Done,
}

impl ChunkPhase {
    /// Legal moves. Any live phase may jump to `Done` when the chunk is aborted.
    pub fn can_advance_to(self, next: ChunkPhase) -> bool {
        use ChunkPhase::*;
        matches!(
            (self, next),
            (Pending, Built)
                | (Built, Signing)
                | (Signing, Submitting)
                | (Submitting, Confirming)
                | (Confirming, Pending)
                | (Pending | Built | Signing | Submitting | Confirming, Done)
        )
    }
}

impl fmt::Display for ChunkPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChunkPhase::Pending => "pending",
            ChunkPhase::Built => "built",
            ChunkPhase::Signing => "signing",
            ChunkPhase::Submitting => "submitting",
            ChunkPhase::Confirming => "confirming",
            ChunkPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Everything known about one chunk while it runs
#[derive(Debug, Clone)]
pub struct ChunkState {
    pub index: usize,
    /// Attempts started so far
    pub attempt: u32,
    pub phase: ChunkPhase,
    /// Batches still to be sent in the next attempt, ordered by batch index
    pub outstanding: Vec<Batch>,
    /// Confirmed batches in confirmation-completion order
    pub confirmed: Vec<ConfirmedBatch>,
    pub failed: Vec<AssetId>,
}

impl ChunkState {
    pub fn new(chunk: Chunk) -> Self {
        Self {
            index: chunk.index,
            attempt: 0,
            phase: ChunkPhase::Pending,
            outstanding: chunk.batches,
            confirmed: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn advance(&mut self, next: ChunkPhase) -> ApproverResult<()> {
        if !self.phase.can_advance_to(next) {
            return Err(ApproverError::InvalidStateTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        self.phase = next;
        Ok(())
    }
}

/// Runs chunks through the retry state machine against one signer and RPC
pub(crate) struct ChunkRunner<'a> {
    config: &'a EngineConfig,
    builder: TransactionBuilder,
    signer: &'a dyn BatchSigner,
    rpc: &'a dyn SolanaRpc,
    sender: TransactionSender<'a>,
    events: &'a broadcast::Sender<EngineEvent>,
}

impl<'a> ChunkRunner<'a> {
    pub fn new(
        config: &'a EngineConfig,
        builder: TransactionBuilder,
        signer: &'a dyn BatchSigner,
        rpc: &'a dyn SolanaRpc,
        events: &'a broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            config,
            builder,
            signer,
            rpc,
            sender: TransactionSender::new(rpc, config.commitment),
            events,
        }
    }

    /// Run `chunk` until every batch is confirmed or failed
    pub async fn run(&self, chunk: Chunk) -> ChunkState {
        let started = Instant::now();
        let assets = chunk.asset_count();
        let mut state = ChunkState::new(chunk);

        info!(
            "Chunk {}: {} assets in {} batches",
            state.index,
            assets,
            state.outstanding.len()
        );
        self.emit(EngineEvent::ChunkStarted {
            chunk: state.index,
            assets,
            batches: state.outstanding.len(),
        });

        while !state.outstanding.is_empty() {
            if state.attempt > self.config.max_retries {
                let reason = format!("retries exhausted after {} attempts", state.attempt);
                self.fail_outstanding(&mut state, "retries_exhausted", &reason);
                break;
            }

            if state.attempt > 0 {
                info!(
                    "Chunk {}: rebuilding {} batches for attempt {}",
                    state.index,
                    state.outstanding.len(),
                    state.attempt + 1
                );
                sleep(self.config.rate_limit_delay()).await;
            }
            state.attempt += 1;

            match self.run_attempt(&mut state).await {
                Ok(0) => {}
                Ok(retrying) => {
                    debug!(
                        "Chunk {} attempt {}: {} batches to retry",
                        state.index, state.attempt, retrying
                    );
                    if state.attempt <= self.config.max_retries {
                        sleep(self.config.rate_limit_delay() * 2).await;
                    }
                }
                Err(e) => {
                    error!(
                        "Chunk {} attempt {} aborted: {}",
                        state.index, state.attempt, e
                    );
                    self.fail_outstanding(&mut state, "chunk_aborted", &e.to_string());
                    break;
                }
            }
        }

        if let Err(e) = state.advance(ChunkPhase::Done) {
            error!("Chunk {}: {}", state.index, e);
        }
        metrics::record_chunk_latency(started.elapsed().as_secs_f64());

        info!(
            "Chunk {} finished after {} attempts: {} batches confirmed, {} assets failed",
            state.index,
            state.attempt,
            state.confirmed.len(),
            state.failed.len()
        );
        self.emit(EngineEvent::ChunkFinished {
            chunk: state.index,
            confirmed: state.confirmed.len(),
            failed_assets: state.failed.len(),
            attempts: state.attempt,
        });

        state
    }

    /// One build, sign, submit, confirm and classify round.
    ///
    /// Returns the number of batches left outstanding for the next attempt.
    async fn run_attempt(&self, state: &mut ChunkState) -> ApproverResult<usize> {
        let limit = self.config.parallel_batch_size;

        let transactions = self.build_all(state).await?;
        state.advance(ChunkPhase::Built)?;

        state.advance(ChunkPhase::Signing)?;
        let requested = transactions.len();
        metrics::record_signing_request();
        self.emit(EngineEvent::SigningRequested {
            chunk: state.index,
            attempt: state.attempt,
            transactions: requested,
        });
        debug!(
            "Chunk {} attempt {}: requesting signatures for {} transactions",
            state.index, state.attempt, requested
        );
        let signed = self.signer.sign_all_transactions(transactions).await?;
        if signed.len() != requested {
            return Err(SignerError::CountMismatch {
                requested,
                returned: signed.len(),
            }
            .into());
        }

        state.advance(ChunkPhase::Submitting)?;
        let sender = &self.sender;
        let mut submissions = join_bounded(
            signed
                .iter()
                .enumerate()
                .map(|(i, tx)| async move { (i, sender.submit(tx).await) }),
            limit,
        )
        .await;
        submissions.sort_by_key(|(i, _)| *i);
        let submissions: Vec<Result<Signature, RpcError>> =
            submissions.into_iter().map(|(_, result)| result).collect();

        let accepted: Vec<(usize, Signature)> = submissions
            .iter()
            .enumerate()
            .filter_map(|(i, result)| result.as_ref().ok().map(|sig| (i, *sig)))
            .collect();
        for _ in &accepted {
            metrics::record_tx_submitted();
        }

        sleep(self.config.rate_limit_delay()).await;

        state.advance(ChunkPhase::Confirming)?;
        let confirmations = join_bounded(
            accepted
                .iter()
                .map(|&(i, signature)| async move { (i, sender.confirm(&signature).await) }),
            limit,
        )
        .await;

        // Confirmed batches keep completion order; rejected submits follow in batch order
        let mut results: Vec<(usize, Option<Result<Confirmation, RpcError>>)> = confirmations
            .into_iter()
            .map(|(i, confirmation)| (i, Some(confirmation)))
            .collect();
        results.extend(
            submissions
                .iter()
                .enumerate()
                .filter(|(_, result)| result.is_err())
                .map(|(i, _)| (i, None)),
        );

        let mut slots: Vec<Option<Batch>> = std::mem::take(&mut state.outstanding)
            .into_iter()
            .map(Some)
            .collect();
        let mut retry = Vec::new();

        for (i, confirmation) in results {
            let Some(batch) = slots.get_mut(i).and_then(Option::take) else {
                continue;
            };
            match classify(&submissions[i], confirmation.as_ref()) {
                BatchOutcome::Confirmed(signature) => {
                    self.record_confirmed(state, batch, signature);
                }
                BatchOutcome::Retryable { reason } => {
                    debug!(
                        "Chunk {} batch {} retryable: {}",
                        state.index, batch.index, reason
                    );
                    metrics::record_tx_retried();
                    self.emit(EngineEvent::BatchRetrying {
                        chunk: state.index,
                        attempt: state.attempt,
                        assets: batch.len(),
                        reason,
                    });
                    retry.push(batch);
                }
                BatchOutcome::PermanentlyFailed { kind, reason } => {
                    warn!(
                        "Chunk {} batch {} failed permanently: {}",
                        state.index, batch.index, reason
                    );
                    self.record_failed(state, batch, kind, reason);
                }
            }
        }

        retry.sort_by_key(|batch| batch.index);
        state.outstanding = retry;
        state.advance(ChunkPhase::Pending)?;

        Ok(state.outstanding.len())
    }

    /// Build every outstanding batch; the first failure aborts the attempt
    async fn build_all(&self, state: &ChunkState) -> ApproverResult<Vec<Transaction>> {
        let builder = &self.builder;
        let rpc = self.rpc;
        let mut built = join_bounded(
            state
                .outstanding
                .iter()
                .enumerate()
                .map(|(i, batch)| async move { (i, builder.build(&batch.asset_ids, rpc).await) }),
            self.config.parallel_batch_size,
        )
        .await;
        built.sort_by_key(|(i, _)| *i);

        built
            .into_iter()
            .map(|(_, result)| {
                result.map_err(|e| ApproverError::Build {
                    chunk: state.index,
                    message: e.to_string(),
                })
            })
            .collect()
    }

    fn record_confirmed(&self, state: &mut ChunkState, batch: Batch, signature: Signature) {
        debug!(
            "Chunk {} batch {} confirmed: {}",
            state.index, batch.index, signature
        );
        metrics::record_tx_confirmed(&self.config.commitment.to_string());
        metrics::record_assets_approved(batch.len());
        self.emit(EngineEvent::BatchConfirmed {
            chunk: state.index,
            attempt: state.attempt,
            signature,
            assets: batch.len(),
        });
        state.confirmed.push(ConfirmedBatch {
            signature,
            asset_ids: batch.asset_ids,
        });
    }

    fn record_failed(&self, state: &mut ChunkState, batch: Batch, kind: &str, reason: String) {
        metrics::record_tx_failed(kind);
        metrics::record_assets_failed(batch.len());
        self.emit(EngineEvent::BatchFailed {
            chunk: state.index,
            attempt: state.attempt,
            asset_ids: batch.asset_ids.clone(),
            reason,
        });
        state.failed.extend(batch.asset_ids);
    }

    /// Move every outstanding batch to the failed set
    fn fail_outstanding(&self, state: &mut ChunkState, kind: &str, reason: &str) {
        let outstanding = std::mem::take(&mut state.outstanding);
        if !outstanding.is_empty() {
            warn!(
                "Chunk {}: {} batches failed: {}",
                state.index,
                outstanding.len(),
                reason
            );
        }
        for batch in outstanding {
            self.record_failed(state, batch, kind, reason.to_string());
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
