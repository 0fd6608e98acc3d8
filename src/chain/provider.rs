//! EVM chain client with multi-RPC failover and local signing

use super::gas::{GasOracle, GasPrice};
use super::{ChainClient, TransactionIntent};
use crate::config::ChainConfig;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::keccak256;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Multi-provider EVM client with automatic failover
pub struct EvmChainClient {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    gas_oracle: GasOracle,
    /// Wallet bound to this chain id
    wallet: LocalWallet,
}

impl EvmChainClient {
    /// Create a new chain client
    pub async fn new(config: ChainConfig, wallet: LocalWallet) -> RelayerResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", config.chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayerError::ChainConnection {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        let gas_oracle = GasOracle::new(
            config.chain_id,
            config.gas_price_strategy.clone(),
            config.max_gas_price_gwei,
        );
        let wallet = wallet.with_chain_id(config.chain_id);

        info!(
            "Chain {} client ready with {} providers, sender {:?}",
            config.chain_id,
            http_providers.len(),
            wallet.address()
        );

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
            gas_oracle,
            wallet,
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Chain {} failover to provider {}", self.config.chain_id, next);
    }

    /// Get current block number with failover
    pub async fn get_block_number(&self) -> RelayerResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!(
                        "Failed to get block number from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(RelayerError::ChainConnection {
            chain_id: self.config.chain_id,
            message: "All providers failed".to_string(),
        })
    }

    /// Next nonce including transactions still in the mempool
    async fn pending_nonce(&self) -> RelayerResult<U256> {
        self.http()
            .get_transaction_count(self.wallet.address(), Some(BlockNumber::Pending.into()))
            .await
            .map_err(|e| RelayerError::Nonce {
                chain_id: self.config.chain_id,
                message: e.to_string(),
            })
    }

    /// Build the typed transaction for an intent
    fn build_tx(&self, intent: &TransactionIntent, nonce: U256, gas_price: &GasPrice) -> TypedTransaction {
        match gas_price {
            GasPrice::Legacy(price) => TransactionRequest::new()
                .to(intent.to)
                .data(intent.data.clone())
                .nonce(nonce)
                .gas(intent.gas_limit)
                .gas_price(*price)
                .chain_id(self.config.chain_id)
                .into(),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest::new()
                .to(intent.to)
                .data(intent.data.clone())
                .nonce(nonce)
                .gas(intent.gas_limit)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                .chain_id(self.config.chain_id)
                .into(),
        }
    }

    /// The node already holds this exact signed transaction
    fn is_already_known(message: &str) -> bool {
        message.contains("already known")
    }

    fn classify_send_error(&self, message: String) -> RelayerError {
        let chain_id = self.config.chain_id;
        if message.contains("insufficient funds") {
            RelayerError::InsufficientBalance {
                chain_id,
                have: "unknown".to_string(),
                need: "unknown".to_string(),
            }
        } else if message.contains("nonce too low") {
            RelayerError::Nonce { chain_id, message }
        } else if message.contains("execution reverted") {
            RelayerError::Contract(message)
        } else if message.contains("rate limit") || message.contains("429") {
            RelayerError::RateLimited { chain_id }
        } else {
            RelayerError::Transaction(message)
        }
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    async fn submit(&self, intent: TransactionIntent) -> RelayerResult<H256> {
        let nonce = self.pending_nonce().await?;
        let gas_price = self.current_gas_price().await?;
        let tx = self.build_tx(&intent, nonce, &gas_price);

        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| RelayerError::Wallet(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);
        let raw_hash = H256::from(keccak256(&raw));

        match timeout(SEND_TIMEOUT, self.http().send_raw_transaction(raw)).await {
            Ok(Ok(pending_tx)) => {
                let tx_hash = pending_tx.tx_hash();
                info!(
                    "Transaction sent on chain {}: {:?} (nonce {})",
                    self.config.chain_id, tx_hash, nonce
                );
                Ok(tx_hash)
            }
            Ok(Err(e)) if Self::is_already_known(&e.to_string()) => {
                // Broadcasting again would spend a fresh nonce on the same call
                info!(
                    "Transaction already in mempool on chain {}: {:?} (nonce {})",
                    self.config.chain_id, raw_hash, nonce
                );
                Ok(raw_hash)
            }
            Ok(Err(e)) => {
                let err = self.classify_send_error(e.to_string());
                if matches!(err, RelayerError::Transaction(_)) {
                    // Unknown failures may be the node, try another next time
                    self.failover();
                }
                Err(err)
            }
            Err(_) => {
                self.failover();
                Err(RelayerError::Timeout {
                    operation: format!("send transaction on chain {}", self.config.chain_id),
                })
            }
        }
    }

    async fn current_gas_price(&self) -> RelayerResult<GasPrice> {
        self.gas_oracle.gas_price(self.http()).await
    }

    async fn health_check(&self) -> bool {
        match self.get_block_number().await {
            Ok(_) => true,
            Err(e) => {
                error!("Health check failed for chain {}: {}", self.config.chain_id, e);
                false
            }
        }
    }
}
