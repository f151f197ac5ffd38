//! Run orchestration across chunks

use super::batching::plan_chunks;
use super::chunk::ChunkRunner;
use super::RunResult;
use crate::chain::{AssetId, SolanaRpc};
use crate::config::EngineConfig;
use crate::events::EngineEvent;
use crate::metrics;
use crate::tx::{BatchSigner, TransactionBuilder};

use solana_sdk::pubkey::Pubkey;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Batch approval engine
pub struct Engine {
    /// Batching, retry and pacing parameters
    config: EngineConfig,
    /// Diagnostic event channel
    events: broadcast::Sender<EngineEvent>,
    /// Shutdown flag, checked between chunks
    shutdown: Arc<RwLock<bool>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            events,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to progress events
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Approve `delegate` on every asset in `asset_ids`.
    ///
    /// Chunks run one after another; a chunk that fails outright does not stop
    /// the ones after it. Repeated asset ids are approved once.
    pub async fn run(
        &self,
        asset_ids: &[AssetId],
        delegate: &Pubkey,
        signer: &dyn BatchSigner,
        rpc: &dyn SolanaRpc,
    ) -> RunResult {
        let asset_ids = dedup_preserving_order(asset_ids);
        let chunks = plan_chunks(&asset_ids, self.config.chunk_size, self.config.batch_size);

        info!(
            "Approving delegate {} for {} assets in {} chunks",
            delegate,
            asset_ids.len(),
            chunks.len()
        );

        let builder = TransactionBuilder::new(signer.pubkey(), *delegate);
        let runner = ChunkRunner::new(&self.config, builder, signer, rpc, &self.events);

        let mut result = RunResult::default();
        let mut chunks = chunks.into_iter();

        while let Some(chunk) = chunks.next() {
            if *self.shutdown.read().await {
                let skipped: Vec<AssetId> = std::iter::once(chunk)
                    .chain(chunks.by_ref())
                    .flat_map(|chunk| chunk.batches)
                    .flat_map(|batch| batch.asset_ids)
                    .collect();
                warn!(
                    "Stop requested, {} assets not attempted are reported as failed",
                    skipped.len()
                );
                metrics::record_assets_failed(skipped.len());
                result.failed_asset_ids.extend(skipped);
                break;
            }

            let state = runner.run(chunk).await;
            result.absorb(state);
        }

        // A stop ends this run only
        *self.shutdown.write().await = false;

        info!(
            "Run complete: {} assets approved in {} transactions, {} assets failed",
            result.approved_count(),
            result.signatures.len(),
            result.failed_count()
        );

        result
    }

    /// Stop after the chunk in progress.
    ///
    /// Applies to the run in progress, or to the next run when none is active.
    pub async fn stop(&self) {
        info!("Stopping approval engine");
        *self.shutdown.write().await = true;
    }
}

fn dedup_preserving_order(asset_ids: &[AssetId]) -> Vec<AssetId> {
    let mut seen = HashSet::with_capacity(asset_ids.len());
    let unique: Vec<AssetId> = asset_ids
        .iter()
        .copied()
        .filter(|id| seen.insert(*id))
        .collect();
    if unique.len() < asset_ids.len() {
        warn!(
            "Ignoring {} repeated asset ids",
            asset_ids.len() - unique.len()
        );
    }
    unique
}
