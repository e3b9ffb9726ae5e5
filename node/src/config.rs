// meridian/node/src/config.rs

use crate::genesis::GenesisConfig;
use anyhow::{anyhow, Result};
use meridian_api::RpcConfig;
use meridian_consensus::types::Address;
use meridian_sequencer::MinerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Overrides `chain.chain_id` when set
pub const CHAIN_ID_ENV: &str = "MERIDIAN_CHAIN_ID";

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    /// Chain configuration
    #[serde(default)]
    pub chain: ChainSection,

    /// RPC configuration
    #[serde(default)]
    pub rpc: RpcSection,

    /// Miner configuration
    #[serde(default)]
    pub miner: MinerSection,

    /// Block producer configuration
    #[serde(default)]
    pub producer: ProducerConfig,

    #[serde(default)]
    pub genesis: GenesisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChainSection {
    /// Chain ID
    pub chain_id: u64,

    /// Gas limit of the genesis block
    pub genesis_gas_limit: u64,
}

impl Default for ChainSection {
    fn default() -> Self {
        Self {
            chain_id: 1337,
            genesis_gas_limit: 30_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RpcSection {
    /// RPC enabled
    pub enabled: bool,

    /// HTTP JSON-RPC listen address
    pub listen_addr: SocketAddr,

    /// WebSocket listen address
    pub ws_addr: SocketAddr,

    /// HTTP server worker threads
    pub threads: usize,
}

impl Default for RpcSection {
    fn default() -> Self {
        let server = RpcConfig::default();
        Self {
            enabled: true,
            listen_addr: server.listen_addr,
            ws_addr: server.ws_addr,
            threads: server.threads,
        }
    }
}

/// `[miner]` as written in the config file; addresses and extra data are text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MinerSection {
    /// Start the pipelines at boot
    pub enabled: bool,

    /// Coinbase address (hex)
    pub etherbase: String,

    /// Extra data, UTF-8 or 0x-prefixed hex
    pub extra_data: String,

    pub recommit_ms: u64,
    pub gas_limit: u64,
    pub preseal: bool,
    pub intake_capacity: usize,
}

impl Default for MinerSection {
    fn default() -> Self {
        let miner = MinerConfig::default();
        Self {
            enabled: miner.enabled,
            etherbase: miner.etherbase.to_hex(),
            extra_data: String::from_utf8_lossy(&miner.extra_data).into_owned(),
            recommit_ms: miner.recommit_ms,
            gas_limit: miner.gas_limit,
            preseal: miner.preseal,
            intake_capacity: miner.intake_capacity,
        }
    }
}

impl MinerSection {
    pub fn to_miner_config(&self) -> Result<MinerConfig> {
        let etherbase = Address::from_hex(&self.etherbase)
            .ok_or_else(|| anyhow!("Invalid etherbase address: {}", self.etherbase))?;
        let extra_data = match self.extra_data.strip_prefix("0x") {
            Some(hex) => hex::decode(hex).map_err(|e| anyhow!("Invalid extra_data hex: {}", e))?,
            None => self.extra_data.as_bytes().to_vec(),
        };
        let config = MinerConfig {
            etherbase,
            extra_data,
            recommit_ms: self.recommit_ms,
            gas_limit: self.gas_limit,
            preseal: self.preseal,
            intake_capacity: self.intake_capacity,
            enabled: self.enabled,
        };
        config.validate().map_err(|e| anyhow!("Invalid miner configuration: {}", e))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProducerConfig {
    /// Slot length in milliseconds; the best candidate is imported once per slot
    pub slot_ms: u64,

    /// Import candidates without transactions
    pub allow_empty: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            slot_ms: 2_000,
            allow_empty: false,
        }
    }
}

impl ProducerConfig {
    pub fn slot(&self) -> Duration {
        Duration::from_millis(self.slot_ms)
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        let mut config = Self {
            chain: ChainSection::default(),
            rpc: RpcSection::default(),
            miner: MinerSection::default(),
            producer: ProducerConfig::default(),
            genesis: GenesisConfig::default(),
        };
        config.apply_env();
        config
    }
}

impl NodeConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        if self.chain.chain_id == 0 {
            return Err(anyhow!("chain_id must be positive"));
        }
        if self.producer.slot_ms == 0 {
            return Err(anyhow!("producer.slot_ms must be positive"));
        }
        if self.rpc.threads == 0 {
            return Err(anyhow!("rpc.threads must be positive"));
        }
        self.miner.to_miner_config()?;
        self.genesis.allocations()?;
        Ok(())
    }

    /// Devnet: mining on, short slots, one-second recommit
    pub fn devnet() -> Self {
        let mut config = Self::default();
        config.miner.enabled = true;
        config.miner.recommit_ms = 1_000;
        config.producer.slot_ms = 1_000;
        config.genesis.dev_accounts = true;
        config
    }

    /// Load from file; the chain ID environment override still applies
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: NodeConfig = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Save to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Some(chain_id) = std::env::var(CHAIN_ID_ENV)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.chain.chain_id = chain_id;
        }
    }

    pub fn chain_config(&self) -> meridian_consensus::types::ChainConfig {
        meridian_consensus::types::ChainConfig {
            chain_id: self.chain.chain_id,
            genesis_gas_limit: self.chain.genesis_gas_limit,
        }
    }

    pub fn rpc_config(&self) -> RpcConfig {
        RpcConfig {
            listen_addr: self.rpc.listen_addr,
            ws_addr: self.rpc.ws_addr,
            threads: self.rpc.threads,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node.toml");

        let mut config = NodeConfig::devnet();
        config.miner.etherbase = format!("0x{}", "cb".repeat(20));
        config.save(&path).unwrap();

        let loaded = NodeConfig::from_file(&path).unwrap();
        assert_eq!(loaded.miner, config.miner);
        assert_eq!(loaded.producer, config.producer);
        assert_eq!(loaded.rpc, config.rpc);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            "[miner]\nenabled = true\nextra_data = \"0x6162\"\nrecommit_ms = 500\n",
        )
        .unwrap();

        let config = NodeConfig::from_file(&path).unwrap();
        assert!(config.rpc.enabled);
        assert_eq!(config.producer, ProducerConfig::default());

        let miner = config.miner.to_miner_config().unwrap();
        assert!(miner.enabled);
        assert_eq!(miner.extra_data, b"ab".to_vec());
        // Clamped by the pipelines, not rejected
        assert_eq!(miner.settings().recommit, Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_bad_miner_section() {
        let mut config = NodeConfig::default();
        config.miner.etherbase = "0xnothex".to_string();
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.miner.extra_data = "x".repeat(33);
        assert!(config.validate().is_err());

        let mut config = NodeConfig::default();
        config.producer.slot_ms = 0;
        assert!(config.validate().is_err());

        assert!(NodeConfig::devnet().validate().is_ok());
    }
}
