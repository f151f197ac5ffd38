//! Collection Delegate Approver - batched SPL delegate approvals for an NFT collection
//!
//! Grants one delegate authority over the NFTs a wallet holds (every holding,
//! or those of a verified Metaplex collection or creator), packing many approvals per transaction and one signing
//! request per chunk of transactions.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

mod chain;
mod config;
mod engine;
mod error;
mod events;
mod metrics;
mod report;
mod tx;

use chain::{AssetDiscovery, AssetId, ChainProvider, DiscoveryFilter};
use config::Settings;
use engine::Engine;
use events::EngineEvent;
use report::RunReport;
use tx::{BatchSigner, KeypairSigner};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load configuration
    let settings = Settings::load()?;

    // Initialize logging
    init_logging(&settings.logging.format);
    for warning in settings.warnings() {
        warn!("{}", warning);
    }

    info!(
        "Starting Collection Delegate Approver v{}",
        env!("CARGO_PKG_VERSION")
    );

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();

    let signer = KeypairSigner::load(&settings.wallet).context("No usable wallet configured")?;
    let owner = signer.pubkey();
    let delegate = settings.delegation.delegate_pubkey()?;
    info!("Wallet {} approving delegate {}", owner, delegate);

    // Initialize RPC provider
    let provider = ChainProvider::new(&settings.rpc)?;
    if !provider.health_check().await {
        warn!("RPC endpoint reported unhealthy, continuing");
    }

    let asset_ids = load_asset_ids(&settings, &provider, &owner).await?;
    if asset_ids.is_empty() {
        info!("No assets to approve");
        return Ok(());
    }
    info!("{} assets to approve", asset_ids.len());

    let engine = Arc::new(Engine::new(settings.engine.clone()));
    if engine.config().commitment.is_reversible() {
        info!(
            "Confirming at {} commitment, results can still be rolled back",
            engine.config().commitment
        );
    }

    // Log progress events
    let events_handle = tokio::spawn(log_events(engine.subscribe_events()));

    // Stop between chunks on Ctrl+C
    let shutdown_handle = tokio::spawn({
        let engine = engine.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received, finishing current chunk...");
            engine.stop().await;
        }
    });

    let result = engine.run(&asset_ids, &delegate, &signer, &provider).await;

    // Dropping the last engine handle closes the event channel; the logger
    // drains what is buffered and exits
    shutdown_handle.abort();
    let _ = shutdown_handle.await;
    drop(engine);
    match events_handle.await {
        Ok(logged) => debug!("Logged {} engine events", logged),
        Err(e) => warn!("Event logger stopped: {}", e),
    }

    info!(
        "{} assets approved, {} assets failed",
        result.approved_count(),
        result.failed_count()
    );
    println!(
        "Approved {} of {} assets ({} failed)",
        result.approved_count(),
        asset_ids.len(),
        result.failed_count()
    );

    if let Some(path) = &settings.report.path {
        let report = RunReport::new(
            run_id,
            started_at,
            owner,
            delegate,
            settings.engine.commitment,
            asset_ids.len(),
            result,
        );
        if let Err(e) = report.write(Path::new(path)) {
            warn!("{:#}", e);
        }
    }

    if settings.metrics.enabled {
        if let Some(path) = &settings.metrics.textfile_path {
            if let Err(e) = metrics::write_textfile(Path::new(path)) {
                warn!("Failed to write metrics to {}: {}", path, e);
            }
        }
    }

    info!("Collection Delegate Approver finished");
    Ok(())
}

/// Asset ids from the configured file, or discovered on chain by collection,
/// creator or owner
async fn load_asset_ids(
    settings: &Settings,
    provider: &ChainProvider,
    owner: &solana_sdk::pubkey::Pubkey,
) -> Result<Vec<AssetId>> {
    if let Some(path) = &settings.delegation.asset_ids_file {
        let ids = config::read_asset_ids(Path::new(path))?;
        info!("Read {} asset ids from {}", ids.len(), path);
        return Ok(ids);
    }

    let filter = settings.delegation.discovery_filter()?;
    info!("Discovering assets: {}", filter);
    let discovered = match &filter {
        DiscoveryFilter::Collection(collection) => {
            provider.list_owned_asset_ids(owner, collection).await
        }
        _ => provider.list_owned_assets(owner, &filter).await,
    };
    discovered.with_context(|| format!("Failed to discover assets: {}", filter))
}

/// Log events until the channel closes. Returns how many were logged.
async fn log_events(mut events: broadcast::Receiver<EngineEvent>) -> usize {
    let mut logged = 0;
    loop {
        match events.recv().await {
            Ok(event) => {
                log_event(&event);
                logged += 1;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!("Event log fell behind, {} events skipped", skipped)
            }
            Err(RecvError::Closed) => return logged,
        }
    }
}

fn log_event(event: &EngineEvent) {
    match event {
        EngineEvent::BatchFailed {
            chunk,
            asset_ids,
            reason,
            ..
        } => warn!(
            "Chunk {}: {} assets failed: {}",
            chunk,
            asset_ids.len(),
            reason
        ),
        EngineEvent::ChunkFinished {
            chunk,
            confirmed,
            failed_assets,
            attempts,
        } => info!(
            "Chunk {} done: {} transactions confirmed, {} assets failed, {} attempts",
            chunk, confirmed, failed_assets, attempts
        ),
        other => debug!(
            "{}: {}",
            other.name(),
            serde_json::to_string(other).unwrap_or_default()
        ),
    }
}

fn init_logging(format: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,collection_delegate_approver=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(chunk: usize) -> EngineEvent {
        EngineEvent::ChunkFinished {
            chunk,
            confirmed: 1,
            failed_assets: 0,
            attempts: 1,
        }
    }

    #[tokio::test]
    async fn test_event_logger_drains_buffer_after_sender_drops() {
        let (sender, receiver) = broadcast::channel(16);
        for chunk in 0..3 {
            sender.send(finished(chunk)).unwrap();
        }
        drop(sender);

        assert_eq!(log_events(receiver).await, 3);
    }

    #[tokio::test]
    async fn test_event_logger_survives_lag() {
        let (sender, receiver) = broadcast::channel(2);
        for chunk in 0..5 {
            sender.send(finished(chunk)).unwrap();
        }
        drop(sender);

        // The three oldest events are overwritten, the rest are still logged
        assert_eq!(log_events(receiver).await, 2);
    }
}
