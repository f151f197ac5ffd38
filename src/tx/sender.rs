//! Submission and confirmation of signed approval transactions

use crate::chain::{Confirmation, ConfirmationLevel, RpcError, SendOptions, SolanaRpc};

use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use tracing::{debug, warn};

/// Sends signed transactions and polls their confirmation.
///
/// Sending never retries on its own: preflight is skipped and the node is told
/// not to rebroadcast, so a failure is reported once and the caller decides.
pub struct TransactionSender<'a> {
    rpc: &'a dyn SolanaRpc,
    level: ConfirmationLevel,
}

impl<'a> TransactionSender<'a> {
    pub fn new(rpc: &'a dyn SolanaRpc, level: ConfirmationLevel) -> Self {
        Self { rpc, level }
    }

    /// Submit a signed transaction
    pub async fn submit(&self, transaction: &Transaction) -> Result<Signature, RpcError> {
        match self
            .rpc
            .send_raw_transaction(transaction, SendOptions::engine_managed())
            .await
        {
            Ok(signature) => {
                debug!("Transaction sent: {}", signature);
                Ok(signature)
            }
            Err(e) => {
                warn!("Transaction send failed: {}", e);
                Err(e)
            }
        }
    }

    /// Wait for `signature` at the configured confirmation level
    pub async fn confirm(&self, signature: &Signature) -> Result<Confirmation, RpcError> {
        let confirmation = self.rpc.confirm_transaction(signature, self.level).await?;
        if let Some(err) = &confirmation.err {
            warn!("Transaction {} failed on chain: {}", signature, err);
        }
        Ok(confirmation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockSolanaRpc;
    use mockall::predicate::eq;
    use solana_sdk::transaction::TransactionError;

    #[tokio::test]
    async fn test_submit_disables_preflight_and_node_retries() {
        let signature = Signature::new_unique();
        let mut rpc = MockSolanaRpc::new();
        rpc.expect_send_raw_transaction()
            .withf(|_, options| options.skip_preflight && options.max_retries == Some(0))
            .times(1)
            .returning(move |_, _| Box::pin(async move { Ok(signature) }));

        let sender = TransactionSender::new(&rpc, ConfirmationLevel::Processed);
        assert_eq!(sender.submit(&Transaction::default()).await.unwrap(), signature);
    }

    #[tokio::test]
    async fn test_confirm_uses_configured_level() {
        let signature = Signature::new_unique();
        let mut rpc = MockSolanaRpc::new();
        rpc.expect_confirm_transaction()
            .with(eq(signature), eq(ConfirmationLevel::Finalized))
            .times(1)
            .returning(|_, _| {
                Box::pin(async {
                    Ok(Confirmation {
                        err: Some(TransactionError::AccountInUse),
                    })
                })
            });

        let sender = TransactionSender::new(&rpc, ConfirmationLevel::Finalized);
        let confirmation = sender.confirm(&signature).await.unwrap();
        assert!(!confirmation.succeeded());
    }
}
