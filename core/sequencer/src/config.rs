// meridian/core/sequencer/src/config.rs

use meridian_consensus::types::Address;
use meridian_consensus::MAX_EXTRA_DATA_SIZE;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Shortest interval at which a pipeline rebuilds its candidate
pub const MIN_RECOMMIT_INTERVAL: Duration = Duration::from_secs(1);

/// Miner configuration, as read from the node config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MinerConfig {
    /// Coinbase for produced blocks
    pub etherbase: Address,

    /// Extra data stamped into produced headers
    pub extra_data: Vec<u8>,

    /// Recommit interval in milliseconds
    pub recommit_ms: u64,

    /// Gas limit for produced blocks
    pub gas_limit: u64,

    /// Assemble speculatively before the first head is observed
    pub preseal: bool,

    /// Bundles buffered per pipeline before the oldest are dropped
    pub intake_capacity: usize,

    /// Start the pipelines immediately
    pub enabled: bool,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            etherbase: Address::zero(),
            extra_data: b"meridian".to_vec(),
            recommit_ms: 3_000,
            gas_limit: 30_000_000,
            preseal: true,
            intake_capacity: 1024,
            enabled: false,
        }
    }
}

impl MinerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.extra_data.len() > MAX_EXTRA_DATA_SIZE {
            return Err(format!(
                "extra_data is {} bytes, at most {} allowed",
                self.extra_data.len(),
                MAX_EXTRA_DATA_SIZE
            ));
        }
        if self.gas_limit == 0 {
            return Err("gas_limit must be positive".to_string());
        }
        if self.intake_capacity == 0 {
            return Err("intake_capacity must be positive".to_string());
        }
        Ok(())
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            extra: self.extra_data.clone(),
            etherbase: self.etherbase,
            recommit: clamp_recommit(Duration::from_millis(self.recommit_ms)),
            preseal: self.preseal,
            gas_limit: self.gas_limit,
        }
    }
}

/// Configuration every pipeline holds a copy of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub extra: Vec<u8>,
    pub etherbase: Address,
    pub recommit: Duration,
    pub preseal: bool,
    pub gas_limit: u64,
}

/// A single configuration change fanned out to every pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigUpdate {
    Extra(Vec<u8>),
    Etherbase(Address),
    Recommit(Duration),
    Preseal(bool),
}

impl ConfigUpdate {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ConfigUpdate::Extra(extra) if extra.len() > MAX_EXTRA_DATA_SIZE => Err(format!(
                "extra data is {} bytes, at most {} allowed",
                extra.len(),
                MAX_EXTRA_DATA_SIZE
            )),
            _ => Ok(()),
        }
    }

    /// Returns whether anything changed
    pub fn apply(&self, settings: &mut PipelineSettings) -> bool {
        match self {
            ConfigUpdate::Extra(extra) => replace(&mut settings.extra, extra.clone()),
            ConfigUpdate::Etherbase(addr) => replace(&mut settings.etherbase, *addr),
            ConfigUpdate::Recommit(interval) => {
                replace(&mut settings.recommit, clamp_recommit(*interval))
            }
            ConfigUpdate::Preseal(on) => replace(&mut settings.preseal, *on),
        }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

pub fn clamp_recommit(interval: Duration) -> Duration {
    if interval < MIN_RECOMMIT_INTERVAL {
        warn!(
            "Recommit interval {:?} too low, using {:?}",
            interval, MIN_RECOMMIT_INTERVAL
        );
        return MIN_RECOMMIT_INTERVAL;
    }
    interval
}
