//! Approval transaction assembly

use crate::chain::{AssetId, RpcError, SolanaRpc};

use solana_sdk::instruction::Instruction;
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::transaction::Transaction;
use spl_associated_token_account::get_associated_token_address;
use thiserror::Error;

/// Errors raised while assembling a transaction
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Failed to fetch blockhash: {0}")]
    Blockhash(#[from] RpcError),

    #[error("Failed to encode approve instruction for {asset}: {message}")]
    Instruction { asset: AssetId, message: String },
}

/// Builds one approve transaction per batch of assets
pub struct TransactionBuilder {
    /// Wallet holding the assets; signs and pays fees
    owner: Pubkey,
    /// Account receiving delegate authority
    delegate: Pubkey,
}

impl TransactionBuilder {
    pub fn new(owner: Pubkey, delegate: Pubkey) -> Self {
        Self { owner, delegate }
    }

    /// `Approve` of one unit from the owner's token account for `asset` to the delegate
    pub fn approve_instruction(&self, asset: &AssetId) -> Result<Instruction, BuildError> {
        let source = get_associated_token_address(&self.owner, asset.mint());

        spl_token::instruction::approve(
            &spl_token::id(),
            &source,
            &self.delegate,
            &self.owner,
            &[],
            1,
        )
        .map_err(|e| BuildError::Instruction {
            asset: *asset,
            message: e.to_string(),
        })
    }

    /// Unsigned transaction approving every asset in `batch`, in order.
    ///
    /// Fetches its own blockhash so rebuilt transactions never reuse a stale one.
    pub async fn build(
        &self,
        batch: &[AssetId],
        rpc: &dyn SolanaRpc,
    ) -> Result<Transaction, BuildError> {
        let instructions = batch
            .iter()
            .map(|asset| self.approve_instruction(asset))
            .collect::<Result<Vec<_>, _>>()?;

        let blockhash = rpc.get_latest_blockhash().await?;
        let message = Message::new_with_blockhash(&instructions, Some(&self.owner), &blockhash);

        Ok(Transaction::new_unsigned(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockSolanaRpc;
    use solana_sdk::hash::Hash;
    use spl_token::instruction::TokenInstruction;

    fn assets(n: usize) -> Vec<AssetId> {
        (0..n).map(|_| AssetId::new(Pubkey::new_unique())).collect()
    }

    #[test]
    fn test_approve_instruction_targets_owner_token_account() {
        let owner = Pubkey::new_unique();
        let delegate = Pubkey::new_unique();
        let asset = AssetId::new(Pubkey::new_unique());
        let builder = TransactionBuilder::new(owner, delegate);

        let ix = builder.approve_instruction(&asset).unwrap();

        assert_eq!(ix.program_id, spl_token::id());
        assert_eq!(ix.accounts[0].pubkey, get_associated_token_address(&owner, asset.mint()));
        assert_eq!(ix.accounts[1].pubkey, delegate);
        assert_eq!(ix.accounts[2].pubkey, owner);
        assert!(ix.accounts[2].is_signer);
        assert_eq!(
            TokenInstruction::unpack(&ix.data).unwrap(),
            TokenInstruction::Approve { amount: 1 }
        );
    }

    #[tokio::test]
    async fn test_build_stamps_blockhash_and_fee_payer() {
        let owner = Pubkey::new_unique();
        let builder = TransactionBuilder::new(owner, Pubkey::new_unique());
        let blockhash = Hash::new_unique();

        let mut rpc = MockSolanaRpc::new();
        rpc.expect_get_latest_blockhash()
            .times(1)
            .returning(move || Box::pin(async move { Ok(blockhash) }));

        let batch = assets(15);
        let tx = builder.build(&batch, &rpc).await.unwrap();

        assert_eq!(tx.message.recent_blockhash, blockhash);
        assert_eq!(tx.message.account_keys[0], owner);
        assert_eq!(tx.message.instructions.len(), 15);
        assert_eq!(tx.message.header.num_required_signatures, 1);
    }

    #[tokio::test]
    async fn test_instructions_follow_asset_order() {
        let owner = Pubkey::new_unique();
        let builder = TransactionBuilder::new(owner, Pubkey::new_unique());

        let mut rpc = MockSolanaRpc::new();
        rpc.expect_get_latest_blockhash()
            .returning(|| Box::pin(async { Ok(Hash::new_unique()) }));

        let batch = assets(5);
        let tx = builder.build(&batch, &rpc).await.unwrap();

        for (ix, asset) in tx.message.instructions.iter().zip(&batch) {
            let source = tx.message.account_keys[ix.accounts[0] as usize];
            assert_eq!(source, get_associated_token_address(&owner, asset.mint()));
        }
    }

    #[tokio::test]
    async fn test_every_build_fetches_a_fresh_blockhash() {
        let builder = TransactionBuilder::new(Pubkey::new_unique(), Pubkey::new_unique());

        let mut rpc = MockSolanaRpc::new();
        rpc.expect_get_latest_blockhash()
            .times(2)
            .returning(|| Box::pin(async { Ok(Hash::new_unique()) }));

        let batch = assets(3);
        let first = builder.build(&batch, &rpc).await.unwrap();
        let second = builder.build(&batch, &rpc).await.unwrap();

        assert_ne!(first.message.recent_blockhash, second.message.recent_blockhash);
        assert_eq!(first.message.instructions, second.message.instructions);
    }

    #[tokio::test]
    async fn test_blockhash_failure_surfaces_as_build_error() {
        let builder = TransactionBuilder::new(Pubkey::new_unique(), Pubkey::new_unique());

        let mut rpc = MockSolanaRpc::new();
        rpc.expect_get_latest_blockhash()
            .returning(|| Box::pin(async { Err(RpcError::Network("connection refused".into())) }));

        let err = builder.build(&assets(2), &rpc).await.unwrap_err();
        assert!(matches!(err, BuildError::Blockhash(RpcError::Network(_))));
    }
}
