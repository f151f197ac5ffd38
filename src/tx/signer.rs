//! Batch signing of approval transactions
//!
//! A wallet signs every transaction of an attempt in one call, so the holder
//! confirms once per attempt instead of once per transaction.

use crate::config::WalletConfig;
use crate::error::{ApproverError, ApproverResult};

use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{read_keypair_file, Keypair, Signer};
use solana_sdk::transaction::Transaction;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum SignerError {
    /// The wallet refused the request
    #[error("Signing rejected: {0}")]
    Rejected(String),

    #[error("Failed to sign transaction {index}: {message}")]
    Failed { index: usize, message: String },

    /// The wallet returned a different number of transactions than it was given
    #[error("Signer returned {returned} transactions for {requested} requested")]
    CountMismatch { requested: usize, returned: usize },
}

/// A wallet able to sign many transactions in a single confirmation
#[async_trait]
pub trait BatchSigner: Send + Sync {
    /// Fee payer and token owner
    fn pubkey(&self) -> Pubkey;

    /// Sign every transaction, returning them in the order given.
    async fn sign_all_transactions(
        &self,
        transactions: Vec<Transaction>,
    ) -> Result<Vec<Transaction>, SignerError>;
}

/// Local keypair wallet
#[derive(Debug)]
pub struct KeypairSigner {
    keypair: Keypair,
}

impl KeypairSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self { keypair }
    }

    /// Load wallet from environment or keypair file
    pub fn load(config: &WalletConfig) -> ApproverResult<Self> {
        // Try environment variable first
        if let Some(var) = &config.private_key_env {
            if let Ok(secret) = std::env::var(var) {
                let keypair = parse_secret_key(&secret)?;
                info!("Loaded wallet {} from ${}", keypair.pubkey(), var);
                return Ok(Self::new(keypair));
            }
        }

        if let Some(path) = &config.keypair_path {
            let keypair = read_keypair_file(path).map_err(|e| {
                ApproverError::Wallet(format!("Failed to read keypair file {}: {}", path, e))
            })?;
            info!("Loaded wallet {} from {}", keypair.pubkey(), path);
            return Ok(Self::new(keypair));
        }

        Err(ApproverError::Wallet(
            "No wallet configured. Set wallet.private_key_env or wallet.keypair_path".to_string(),
        ))
    }
}

/// Parse a secret key given as base58 or as a JSON byte array
fn parse_secret_key(secret: &str) -> ApproverResult<Keypair> {
    let secret = secret.trim();
    let bytes: Vec<u8> = if secret.starts_with('[') {
        serde_json::from_str(secret)
            .map_err(|e| ApproverError::Wallet(format!("Invalid keypair JSON: {}", e)))?
    } else {
        bs58::decode(secret)
            .into_vec()
            .map_err(|e| ApproverError::Wallet(format!("Invalid base58 secret key: {}", e)))?
    };

    Keypair::try_from(bytes.as_slice())
        .map_err(|e| ApproverError::Wallet(format!("Invalid secret key: {}", e)))
}

#[async_trait]
impl BatchSigner for KeypairSigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign_all_transactions(
        &self,
        transactions: Vec<Transaction>,
    ) -> Result<Vec<Transaction>, SignerError> {
        transactions
            .into_iter()
            .enumerate()
            .map(|(index, mut tx)| {
                let blockhash = tx.message.recent_blockhash;
                tx.try_sign(&[&self.keypair], blockhash)
                    .map_err(|e| SignerError::Failed {
                        index,
                        message: e.to_string(),
                    })?;
                Ok(tx)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::hash::Hash;
    use solana_sdk::message::Message;
    use solana_sdk::signature::write_keypair_file;
    use solana_sdk::system_instruction;

    fn unsigned_transfer(payer: &Pubkey) -> Transaction {
        let ix = system_instruction::transfer(payer, &Pubkey::new_unique(), 1);
        Transaction::new_unsigned(Message::new_with_blockhash(
            &[ix],
            Some(payer),
            &Hash::new_unique(),
        ))
    }

    #[tokio::test]
    async fn test_signs_every_transaction_in_order() {
        let signer = KeypairSigner::new(Keypair::new());
        let txs: Vec<_> = (0..3).map(|_| unsigned_transfer(&signer.pubkey())).collect();
        let hashes: Vec<_> = txs.iter().map(|t| t.message.recent_blockhash).collect();

        let signed = signer.sign_all_transactions(txs).await.unwrap();

        assert_eq!(signed.len(), 3);
        for (tx, hash) in signed.iter().zip(hashes) {
            assert!(tx.is_signed());
            assert_eq!(tx.message.recent_blockhash, hash);
            tx.verify().unwrap();
        }
    }

    #[tokio::test]
    async fn test_foreign_fee_payer_fails() {
        let signer = KeypairSigner::new(Keypair::new());
        let tx = unsigned_transfer(&Pubkey::new_unique());

        let err = signer.sign_all_transactions(vec![tx]).await.unwrap_err();
        assert!(matches!(err, SignerError::Failed { index: 0, .. }));
    }

    #[test]
    fn test_parse_base58_and_json_secrets() {
        let keypair = Keypair::new();

        let from_b58 = parse_secret_key(&keypair.to_base58_string()).unwrap();
        assert_eq!(from_b58.pubkey(), keypair.pubkey());

        let json = serde_json::to_string(&keypair.to_bytes().to_vec()).unwrap();
        let from_json = parse_secret_key(&json).unwrap();
        assert_eq!(from_json.pubkey(), keypair.pubkey());

        assert!(parse_secret_key("0OIl").is_err());
        assert!(parse_secret_key("[1, 2, 3]").is_err());
    }

    #[test]
    fn test_load_from_env_then_file() {
        let env_key = Keypair::new();
        std::env::set_var("APPROVER_TEST_SECRET", env_key.to_base58_string());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("id.json");
        let file_key = Keypair::new();
        write_keypair_file(&file_key, &path).unwrap();

        let config = WalletConfig {
            keypair_path: Some(path.to_string_lossy().into_owned()),
            private_key_env: Some("APPROVER_TEST_SECRET".to_string()),
        };
        assert_eq!(KeypairSigner::load(&config).unwrap().pubkey(), env_key.pubkey());

        std::env::remove_var("APPROVER_TEST_SECRET");
        assert_eq!(KeypairSigner::load(&config).unwrap().pubkey(), file_key.pubkey());
    }

    #[test]
    fn test_missing_wallet_is_reported() {
        let err = KeypairSigner::load(&WalletConfig::default()).unwrap_err();
        assert!(matches!(err, ApproverError::Wallet(_)));
    }

    #[test]
    fn test_unreadable_keypair_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let config = WalletConfig {
            keypair_path: Some(path.to_string_lossy().into_owned()),
            private_key_env: None,
        };

        let err = KeypairSigner::load(&config).unwrap_err();
        match err {
            ApproverError::Wallet(message) => assert!(message.contains("missing.json")),
            other => panic!("unexpected error {:?}", other),
        }
    }
}
