//! Gas price oracles for different chain types

use crate::config::GasPriceStrategy;
use crate::error::{RelayerError, RelayerResult};

use ethers::prelude::*;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const POLYGON_GAS_STATION: &str = "https://gasstation.polygon.technology/v2";
const GWEI: u64 = 1_000_000_000;

/// Gas price types
#[derive(Debug, Clone, PartialEq)]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GasStationTier {
    max_priority_fee: f64,
    max_fee: f64,
}

#[derive(Debug, Deserialize)]
struct GasStationResponse {
    fast: GasStationTier,
}

/// Per-chain gas oracle
pub struct GasOracle {
    chain_id: u64,
    strategy: GasPriceStrategy,
    max_gas_price: U256,
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
    http: reqwest::Client,
}

impl GasOracle {
    /// Create a new gas oracle
    pub fn new(chain_id: u64, strategy: GasPriceStrategy, max_gas_price_gwei: u64) -> Self {
        Self {
            chain_id,
            strategy,
            max_gas_price: U256::from(max_gas_price_gwei) * U256::from(GWEI),
            gas_price_buffer_percent: 10,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Get buffered gas price for the chain
    pub async fn gas_price(&self, provider: &Provider<Http>) -> RelayerResult<GasPrice> {
        let raw = match self.strategy {
            GasPriceStrategy::Legacy | GasPriceStrategy::Arbitrum => {
                // Arbitrum folds the L1 component into eth_gasPrice
                let price = provider
                    .get_gas_price()
                    .await
                    .map_err(|e| RelayerError::GasEstimation(e.to_string()))?;
                GasPrice::Legacy(price)
            }
            GasPriceStrategy::Eip1559 | GasPriceStrategy::Optimism => {
                self.estimate_eip1559_fees(provider).await?
            }
            GasPriceStrategy::Polygon => self.polygon_gas_station().await?,
        };

        let buffered = self.apply_buffer(raw);
        debug!("Gas price for chain {}: {:?}", self.chain_id, buffered);
        Ok(buffered)
    }

    /// Estimate EIP-1559 fees
    async fn estimate_eip1559_fees(&self, provider: &Provider<Http>) -> RelayerResult<GasPrice> {
        let block = provider
            .get_block(BlockNumber::Latest)
            .await
            .map_err(|e| RelayerError::GasEstimation(e.to_string()))?
            .ok_or_else(|| RelayerError::GasEstimation("No latest block".to_string()))?;

        let base_fee = block
            .base_fee_per_gas
            .ok_or_else(|| RelayerError::GasEstimation("No base fee in block".to_string()))?;

        let priority_fee = U256::from(2 * GWEI);

        // Max fee = 2 * base_fee + priority_fee
        let max_fee = base_fee * 2 + priority_fee;

        Ok(GasPrice::Eip1559 {
            max_fee_per_gas: max_fee,
            max_priority_fee_per_gas: priority_fee,
        })
    }

    /// Polygon gas station "fast" tier
    async fn polygon_gas_station(&self) -> RelayerResult<GasPrice> {
        let response: GasStationResponse = self
            .http
            .get(POLYGON_GAS_STATION)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| RelayerError::GasEstimation(format!("gas station: {}", e)))?
            .json()
            .await
            .map_err(|e| RelayerError::GasEstimation(format!("gas station body: {}", e)))?;

        Ok(GasPrice::Eip1559 {
            max_fee_per_gas: gwei_to_wei(response.fast.max_fee),
            max_priority_fee_per_gas: gwei_to_wei(response.fast.max_priority_fee),
        })
    }

    /// Add the safety buffer and cap at the configured maximum
    pub fn apply_buffer(&self, price: GasPrice) -> GasPrice {
        let bump = |p: U256| {
            let buffered = p + p * self.gas_price_buffer_percent / 100;
            std::cmp::min(buffered, self.max_gas_price)
        };

        match price {
            GasPrice::Legacy(price) => GasPrice::Legacy(bump(price)),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let max_fee_per_gas = bump(max_fee_per_gas);
                GasPrice::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas: std::cmp::min(
                        bump(max_priority_fee_per_gas),
                        max_fee_per_gas,
                    ),
                }
            }
        }
    }
}

fn gwei_to_wei(gwei: f64) -> U256 {
    U256::from((gwei.max(0.0) * GWEI as f64) as u128)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_adds_ten_percent() {
        let oracle = GasOracle::new(1, GasPriceStrategy::Legacy, 500);
        let price = oracle.apply_buffer(GasPrice::Legacy(U256::from(100 * GWEI)));
        assert_eq!(price, GasPrice::Legacy(U256::from(110 * GWEI)));
    }

    #[test]
    fn test_buffer_respects_cap() {
        let oracle = GasOracle::new(137, GasPriceStrategy::Polygon, 100);
        let price = oracle.apply_buffer(GasPrice::Eip1559 {
            max_fee_per_gas: U256::from(200 * GWEI),
            max_priority_fee_per_gas: U256::from(150 * GWEI),
        });
        assert_eq!(
            price,
            GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(100 * GWEI),
                max_priority_fee_per_gas: U256::from(100 * GWEI),
            }
        );
    }

    #[test]
    fn test_gas_station_body() {
        let response: GasStationResponse = serde_json::from_str(
            r#"{
                "safeLow": {"maxPriorityFee": 30.0, "maxFee": 31.5},
                "standard": {"maxPriorityFee": 32.1, "maxFee": 33.6},
                "fast": {"maxPriorityFee": 40.5, "maxFee": 42.0},
                "estimatedBaseFee": 1.5,
                "blockTime": 2,
                "blockNumber": 52000000
            }"#,
        )
        .unwrap();
        assert_eq!(gwei_to_wei(response.fast.max_fee), U256::from(42 * GWEI));
        assert_eq!(
            gwei_to_wei(response.fast.max_priority_fee),
            U256::from(40_500_000_000u64)
        );
    }
}
