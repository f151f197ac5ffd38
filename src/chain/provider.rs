//! Solana RPC provider with multi-endpoint failover

use super::{Confirmation, ConfirmationLevel, RpcError, SendOptions, SolanaRpc};
use crate::config::RpcConfig;
use crate::error::{ApproverError, ApproverResult};

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// RPC-backed implementation of the chain collaborators
pub struct ChainProvider {
    /// One client per configured endpoint
    clients: Vec<RpcClient>,
    /// Current active client index
    current: AtomicUsize,
    confirm_timeout: Duration,
    confirm_poll_interval: Duration,
}

impl ChainProvider {
    /// Create a provider for every configured endpoint
    pub fn new(config: &RpcConfig) -> ApproverResult<Self> {
        let clients: Vec<RpcClient> = config
            .urls
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(|url| {
                debug!("Added RPC endpoint: {}", url);
                RpcClient::new_with_timeout_and_commitment(
                    url.to_string(),
                    config.timeout(),
                    CommitmentConfig::confirmed(),
                )
            })
            .collect();

        if clients.is_empty() {
            return Err(ApproverError::Config("No valid RPC endpoints".to_string()));
        }

        info!("RPC provider initialized with {} endpoint(s)", clients.len());

        Ok(Self {
            clients,
            current: AtomicUsize::new(0),
            confirm_timeout: config.confirm_timeout(),
            confirm_poll_interval: config.confirm_poll_interval(),
        })
    }

    /// Get the active client
    pub(crate) fn http(&self) -> &RpcClient {
        let idx = self.current.load(Ordering::Relaxed);
        &self.clients[idx % self.clients.len()]
    }

    /// Switch to next available endpoint
    fn failover(&self) {
        if self.clients.len() < 2 {
            return;
        }
        let current = self.current.load(Ordering::Relaxed);
        let next = (current + 1) % self.clients.len();
        self.current.store(next, Ordering::Relaxed);
        warn!("RPC failover to endpoint {}", next);
    }

    /// Health check
    pub async fn health_check(&self) -> bool {
        match self.http().get_health().await {
            Ok(()) => true,
            Err(e) => {
                warn!("RPC health check failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl SolanaRpc for ChainProvider {
    /// Latest blockhash, trying each endpoint once
    async fn get_latest_blockhash(&self) -> Result<Hash, RpcError> {
        let mut last_error = None;

        for _ in 0..self.clients.len() {
            match self.http().get_latest_blockhash().await {
                Ok(hash) => return Ok(hash),
                Err(e) => {
                    let err = RpcError::from_client_error(&e);
                    warn!("Failed to get latest blockhash: {}", err);
                    last_error = Some(err);
                    self.failover();
                }
            }
        }

        Err(last_error.unwrap_or_else(|| RpcError::Rpc("All endpoints failed".to_string())))
    }

    async fn send_raw_transaction(
        &self,
        transaction: &Transaction,
        options: SendOptions,
    ) -> Result<Signature, RpcError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: options.skip_preflight,
            max_retries: options.max_retries,
            ..Default::default()
        };

        self.http()
            .send_transaction_with_config(transaction, config)
            .await
            .map_err(RpcError::from)
    }

    /// Poll signature status until it reaches `level`, fails, or the confirm timeout passes
    async fn confirm_transaction(
        &self,
        signature: &Signature,
        level: ConfirmationLevel,
    ) -> Result<Confirmation, RpcError> {
        let commitment = level.commitment();
        let deadline = Instant::now() + self.confirm_timeout;

        loop {
            let response = self
                .http()
                .get_signature_statuses(&[*signature])
                .await
                .map_err(RpcError::from)?;

            if let Some(Some(status)) = response.value.first() {
                if status.err.is_some() {
                    return Ok(Confirmation {
                        err: status.err.clone(),
                    });
                }
                if status.satisfies_commitment(commitment) {
                    return Ok(Confirmation::default());
                }
            }

            if Instant::now() >= deadline {
                return Err(RpcError::Timeout(format!(
                    "{} confirmation of {}",
                    level, signature
                )));
            }

            tokio::time::sleep(self.confirm_poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_config(urls: Vec<&str>) -> RpcConfig {
        RpcConfig {
            urls: urls.into_iter().map(String::from).collect(),
            timeout_secs: 5,
            confirm_timeout_secs: 10,
            confirm_poll_interval_ms: 100,
        }
    }

    #[test]
    fn test_new_requires_an_endpoint() {
        assert!(ChainProvider::new(&rpc_config(vec![])).is_err());
        assert!(ChainProvider::new(&rpc_config(vec!["  "])).is_err());
    }

    #[test]
    fn test_failover_cycles_endpoints() {
        let provider = ChainProvider::new(&rpc_config(vec![
            "http://127.0.0.1:8899",
            "http://127.0.0.1:8900",
        ]))
        .unwrap();

        assert_eq!(provider.http().url(), "http://127.0.0.1:8899");
        provider.failover();
        assert_eq!(provider.http().url(), "http://127.0.0.1:8900");
        provider.failover();
        assert_eq!(provider.http().url(), "http://127.0.0.1:8899");
    }

    #[test]
    fn test_single_endpoint_does_not_fail_over() {
        let provider = ChainProvider::new(&rpc_config(vec!["http://127.0.0.1:8899"])).unwrap();
        provider.failover();
        assert_eq!(provider.http().url(), "http://127.0.0.1:8899");
    }
}
