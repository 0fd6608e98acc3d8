//! UTXO lookups for gateway addresses

use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// An unspent output paying a gateway address
#[derive(Debug, Clone, PartialEq)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    pub amount: u64,
    pub confirmations: u64,
}

/// Source of confirmed deposits on the UTXO chain
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UtxoSource: Send + Sync {
    /// Outputs at `address` with at least `min_confirmations` confirmations
    async fn confirmed_utxos(&self, address: &str, min_confirmations: u64)
        -> RelayerResult<Vec<Utxo>>;

    /// Current chain tip height
    async fn tip_height(&self) -> RelayerResult<u64>;
}

#[derive(Debug, Deserialize)]
struct EsploraUtxo {
    txid: String,
    vout: u32,
    value: u64,
    status: EsploraStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    confirmed: bool,
    block_height: Option<u64>,
}

/// Esplora REST client (blockstream.info / mempool.space compatible)
pub struct EsploraClient {
    base_url: String,
    http: reqwest::Client,
}

impl EsploraClient {
    pub fn new(base_url: &str) -> RelayerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RelayerError::UtxoLookup(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn get(&self, path: &str) -> RelayerResult<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        self.http
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RelayerError::UtxoLookup(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl UtxoSource for EsploraClient {
    async fn confirmed_utxos(
        &self,
        address: &str,
        min_confirmations: u64,
    ) -> RelayerResult<Vec<Utxo>> {
        let raw: Vec<EsploraUtxo> = self
            .get(&format!("/address/{}/utxo", address))
            .await?
            .json()
            .await
            .map_err(|e| RelayerError::UtxoLookup(e.to_string()))?;

        if raw.is_empty() {
            return Ok(Vec::new());
        }

        let tip = self.tip_height().await?;
        let utxos = with_confirmations(raw, tip, min_confirmations);
        debug!(
            "{} has {} outputs with >= {} confirmations",
            address,
            utxos.len(),
            min_confirmations
        );
        Ok(utxos)
    }

    async fn tip_height(&self) -> RelayerResult<u64> {
        let body = self
            .get("/blocks/tip/height")
            .await?
            .text()
            .await
            .map_err(|e| RelayerError::UtxoLookup(e.to_string()))?;

        body.trim()
            .parse()
            .map_err(|e| RelayerError::UtxoLookup(format!("bad tip height {:?}: {}", body, e)))
    }
}

fn with_confirmations(raw: Vec<EsploraUtxo>, tip: u64, min_confirmations: u64) -> Vec<Utxo> {
    raw.into_iter()
        .filter_map(|u| {
            let confirmations = match (u.status.confirmed, u.status.block_height) {
                (true, Some(height)) => tip.saturating_sub(height) + 1,
                _ => 0,
            };
            (confirmations >= min_confirmations).then(|| Utxo {
                txid: u.txid,
                vout: u.vout,
                amount: u.value,
                confirmations,
            })
        })
        .collect()
}
