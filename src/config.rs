//! Configuration management for the Zero keeper
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub queue: QueueConfig,
    pub pending: PendingConfig,
    pub watcher: WatcherConfig,
    pub dispatcher: DispatcherConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub chains: HashMap<String, ChainConfig>,
    #[serde(default)]
    pub wallet: WalletConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub instance_id: String,
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BtcNetwork {
    Mainnet,
    Testnet,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PendingConfig {
    pub enabled: bool,
    /// Public key hash of the signing network, 20 bytes hex
    pub mpkh: String,
    pub network: BtcNetwork,
    pub utxo_api_url: String,
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u64,
    /// Controller whose requests only need the repay leg
    #[serde(default)]
    pub no_dispatch_controller: Address,
    #[serde(default = "default_idle_ms")]
    pub idle_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    pub enabled: bool,
    pub signing_network_url: String,
    pub poll_interval_ms: u64,
    pub signature_timeout_secs: u64,
    pub signature_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub gas_limit: u64,
    pub error_timeout_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
    Arbitrum,
    Optimism,
    /// Polygon gas station "fast" tier
    Polygon,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            private_key_env: default_private_key_env(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_min_confirmations() -> u64 {
    1
}

fn default_idle_ms() -> u64 {
    500
}

fn default_private_key_env() -> String {
    "RELAYER_PRIVATE_KEY".to_string()
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("ZERO_KEEPER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    fn parse(raw: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.queue.backend == QueueBackend::Postgres && self.queue.url.is_empty() {
            anyhow::bail!("Postgres queue backend requires queue.url");
        }

        if self.pending.enabled {
            let mpkh = hex::decode(self.pending.mpkh.trim_start_matches("0x"))
                .with_context(|| "pending.mpkh is not valid hex")?;
            if mpkh.len() != 20 {
                anyhow::bail!("pending.mpkh must be 20 bytes, got {}", mpkh.len());
            }
            if self.pending.min_confirmations == 0 {
                anyhow::bail!("pending.min_confirmations must be at least 1");
            }
        }

        if self.dispatcher.enabled {
            // The dispatcher is useless without somewhere to send transactions
            if self.enabled_chains().is_empty() {
                anyhow::bail!("At least one chain must be enabled to run the dispatcher");
            }
            if self.dispatcher.max_attempts == 0 {
                anyhow::bail!("dispatcher.max_attempts must be at least 1");
            }
        }

        for (name, chain) in &self.chains {
            if chain.enabled && chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
        }

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn signature_timeout(&self) -> Duration {
        Duration::from_secs(self.signature_timeout_secs)
    }
}

impl DispatcherConfig {
    pub fn error_timeout(&self) -> Duration {
        Duration::from_millis(self.error_timeout_ms)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
        [relayer]
        instance_id = "keeper-test"
        health_check_interval_secs = 30

        [queue]
        backend = "memory"

        [pending]
        enabled = true
        mpkh = "0x0c2ab9dbc62fcd3d9bfd7e1e4c9f4d3a4e8e8f10"
        network = "mainnet"
        utxo_api_url = "https://blockstream.info/api"

        [watcher]
        enabled = true
        signing_network_url = "http://localhost:8545"
        poll_interval_ms = 1000
        signature_timeout_secs = 3600
        signature_poll_interval_ms = 5000

        [dispatcher]
        enabled = true
        gas_limit = 500000
        error_timeout_ms = 1000
        max_attempts = 10

        [api]
        host = "127.0.0.1"
        port = 8080

        [metrics]
        enabled = false
        port = 9090

        [chains.polygon]
        chain_id = 137
        name = "Polygon"
        rpc_urls = ["https://polygon-rpc.com"]
        gas_price_strategy = "polygon"
        max_gas_price_gwei = 1000
        enabled = true
    "#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_sample_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.queue.backend, QueueBackend::Memory);
        assert_eq!(settings.pending.min_confirmations, 1);
        assert_eq!(settings.pending.no_dispatch_controller, Address::zero());
        assert_eq!(settings.wallet.private_key_env, "RELAYER_PRIVATE_KEY");
        assert_eq!(
            settings.get_chain_by_id(137).unwrap().gas_price_strategy,
            GasPriceStrategy::Polygon
        );
    }

    #[test]
    fn test_rejects_short_mpkh() {
        let broken = SAMPLE.replace("0x0c2ab9dbc62fcd3d9bfd7e1e4c9f4d3a4e8e8f10", "0x0c2a");
        let err = Settings::parse(&broken).unwrap_err();
        assert!(err.to_string().contains("20 bytes"));
    }

    #[test]
    fn test_dispatcher_requires_a_chain() {
        let no_chains = SAMPLE.replace(
            "max_gas_price_gwei = 1000\n        enabled = true",
            "max_gas_price_gwei = 1000\n        enabled = false",
        );
        assert!(Settings::parse(&no_chains).is_err());
    }
}
