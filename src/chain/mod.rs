//! Chain module - per-chain transaction submission
//!
//! This module provides:
//! - The `ChainClient` capability every destination chain exposes
//! - A registry of clients keyed by chain id, built once at startup
//! - Multi-RPC EVM clients with failover and chain-specific gas oracles

pub mod gas;
pub mod provider;

pub use gas::GasPrice;
pub use provider::EvmChainClient;

use crate::config::Settings;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use dashmap::DashMap;
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;
use tracing::{info, warn};

/// Transaction as submitted: no chain id, the client knows its own chain
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionIntent {
    pub to: Address,
    pub data: Bytes,
    pub gas_limit: U256,
}

/// What the dispatcher needs from a destination chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Sign and broadcast, returning the transaction hash
    async fn submit(&self, intent: TransactionIntent) -> RelayerResult<H256>;

    async fn current_gas_price(&self) -> RelayerResult<GasPrice>;

    async fn health_check(&self) -> bool;
}

/// Chain clients indexed by chain ID
#[derive(Default)]
pub struct ChainRegistry {
    clients: DashMap<u64, Arc<dyn ChainClient>>,
}

impl ChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build EVM clients for all enabled chains
    pub async fn from_settings(settings: &Settings, wallet: LocalWallet) -> RelayerResult<Self> {
        let registry = Self::new();

        for (name, chain_config) in settings.enabled_chains() {
            info!(
                "Initializing chain {} (ID: {})",
                chain_config.name, chain_config.chain_id
            );

            match EvmChainClient::new(chain_config.clone(), wallet.clone()).await {
                Ok(client) => registry.insert(Arc::new(client)),
                Err(e) => warn!("Skipping chain {}: {}", name, e),
            }
        }

        if registry.connected_chains().is_empty() {
            return Err(RelayerError::Config(
                "No chain client could be initialized".to_string(),
            ));
        }

        Ok(registry)
    }

    pub fn insert(&self, client: Arc<dyn ChainClient>) {
        self.clients.insert(client.chain_id(), client);
    }

    /// Get client for a specific chain
    pub fn get(&self, chain_id: u64) -> RelayerResult<Arc<dyn ChainClient>> {
        self.clients
            .get(&chain_id)
            .map(|c| c.clone())
            .ok_or(RelayerError::ChainNotFound { chain_id })
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let clients: Vec<_> = self.clients.iter().map(|e| e.value().clone()).collect();
        let checks = clients.iter().map(|client| async move {
            let healthy = client.health_check().await;
            crate::metrics::record_chain_health(client.chain_id(), healthy);
            (client.chain_id(), healthy)
        });

        futures::future::join_all(checks).await
    }

    /// Get all connected chain IDs
    pub fn connected_chains(&self) -> Vec<u64> {
        let mut chains: Vec<u64> = self.clients.iter().map(|e| *e.key()).collect();
        chains.sort_unstable();
        chains
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_client(chain_id: u64, healthy: bool) -> Arc<dyn ChainClient> {
        let mut client = MockChainClient::new();
        client.expect_chain_id().return_const(chain_id);
        client.expect_health_check().return_const(healthy);
        Arc::new(client)
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let registry = ChainRegistry::new();
        registry.insert(mock_client(137, true));
        registry.insert(mock_client(1, false));

        assert_eq!(registry.get(137).unwrap().chain_id(), 137);
        assert!(matches!(
            registry.get(43114),
            Err(RelayerError::ChainNotFound { chain_id: 43114 })
        ));
        assert_eq!(registry.connected_chains(), vec![1, 137]);

        let mut health = registry.health_check().await;
        health.sort_unstable();
        assert_eq!(health, vec![(1, false), (137, true)]);
    }
}
