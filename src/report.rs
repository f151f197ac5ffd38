//! JSON summary of a finished run

use crate::chain::ConfirmationLevel;
use crate::engine::RunResult;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_pubkey")]
    pub owner: Pubkey,
    #[serde(serialize_with = "serialize_pubkey")]
    pub delegate: Pubkey,
    pub commitment: ConfirmationLevel,
    pub assets_requested: usize,
    pub assets_approved: usize,
    pub assets_failed: usize,
    #[serde(flatten)]
    pub result: RunResult,
}

fn serialize_pubkey<S: serde::Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(key)
}

impl RunReport {
    pub fn new(
        run_id: Uuid,
        started_at: DateTime<Utc>,
        owner: Pubkey,
        delegate: Pubkey,
        commitment: ConfirmationLevel,
        assets_requested: usize,
        result: RunResult,
    ) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            owner,
            delegate,
            commitment,
            assets_requested,
            assets_approved: result.approved_count(),
            assets_failed: result.failed_count(),
            result,
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report: {:?}", path))?;
        info!("Run report written to {}", path.display());
        Ok(())
    }
}
