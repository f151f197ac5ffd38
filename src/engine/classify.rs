//! Per-batch outcome classification

use crate::chain::{Confirmation, RpcError};

use solana_sdk::signature::Signature;

/// Where a batch goes after one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Reached the confirmation level without an execution error
    Confirmed(Signature),
    /// Rebuild with a fresh blockhash and try again
    Retryable { reason: String },
    /// Out of the run; `kind` labels metrics
    PermanentlyFailed { kind: &'static str, reason: String },
}

/// Classify one batch from its submit result and, when the submit was accepted,
/// its confirmation result.
///
/// A rejected submit is retried only for a transient error. Anything that goes
/// wrong after the node accepted the transaction (confirm error, timeout or an
/// on-chain execution error) is retried; if the first transaction did land, the
/// rebuilt approval of the same delegate is idempotent.
pub fn classify(
    submit: &Result<Signature, RpcError>,
    confirm: Option<&Result<Confirmation, RpcError>>,
) -> BatchOutcome {
    match (submit, confirm) {
        (Err(e), _) if e.is_transient() => BatchOutcome::Retryable {
            reason: e.to_string(),
        },
        (Err(e), _) => BatchOutcome::PermanentlyFailed {
            kind: e.kind(),
            reason: e.to_string(),
        },
        (Ok(signature), Some(Ok(confirmation))) => match &confirmation.err {
            None => BatchOutcome::Confirmed(*signature),
            Some(err) => BatchOutcome::Retryable {
                reason: format!("transaction {} failed on chain: {}", signature, err),
            },
        },
        (Ok(signature), Some(Err(e))) => BatchOutcome::Retryable {
            reason: format!("confirmation of {} failed: {}", signature, e),
        },
        (Ok(signature), None) => BatchOutcome::Retryable {
            reason: format!("transaction {} was not confirmed", signature),
        },
    }
}
