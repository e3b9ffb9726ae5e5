// meridian/node/src/genesis.rs

use anyhow::{anyhow, Context, Result};
use ed25519_dalek::SigningKey;
use meridian_consensus::types::{keccak256, Address, PublicKey};
use serde::{Deserialize, Serialize};

/// Balance given to each development account (1000 ether)
pub const DEV_BALANCE: u128 = 1_000 * 1_000_000_000_000_000_000;

/// Number of deterministic development accounts
pub const DEV_ACCOUNTS: usize = 4;

/// Prefunded account
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenesisAccount {
    /// 20-byte hex address
    pub address: String,

    /// Decimal or 0x-prefixed balance in wei
    pub balance: String,
}

/// Genesis block configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GenesisConfig {
    /// Genesis timestamp, current time when unset
    pub timestamp: Option<u64>,

    /// Prefund the deterministic development accounts
    pub dev_accounts: bool,

    pub alloc: Vec<GenesisAccount>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            timestamp: None,
            dev_accounts: true,
            alloc: vec![],
        }
    }
}

impl GenesisConfig {
    /// Resolve every prefunded account
    pub fn allocations(&self) -> Result<Vec<(Address, u128)>> {
        let mut alloc = Vec::new();
        if self.dev_accounts {
            alloc.extend(dev_keys().iter().map(|key| (dev_address(key), DEV_BALANCE)));
        }
        for account in &self.alloc {
            let address = Address::from_hex(&account.address)
                .ok_or_else(|| anyhow!("Invalid genesis address: {}", account.address))?;
            let balance = parse_balance(&account.balance)
                .with_context(|| format!("Invalid balance for {}", account.address))?;
            alloc.push((address, balance));
        }
        Ok(alloc)
    }
}

fn parse_balance(s: &str) -> Result<u128> {
    let value = match s.strip_prefix("0x") {
        Some(hex) => u128::from_str_radix(hex, 16)?,
        None => s.parse()?,
    };
    Ok(value)
}

/// Development signing keys, derived from `keccak256("meridian-dev-<i>")`
pub fn dev_keys() -> Vec<SigningKey> {
    (0..DEV_ACCOUNTS)
        .map(|i| {
            let seed = keccak256(format!("meridian-dev-{}", i).as_bytes());
            SigningKey::from_bytes(seed.as_bytes())
        })
        .collect()
}

pub fn dev_address(key: &SigningKey) -> Address {
    Address::from_public_key(&PublicKey::new(key.verifying_key().to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_keys_are_deterministic() {
        let a = dev_keys();
        let b = dev_keys();
        assert_eq!(a.len(), DEV_ACCOUNTS);
        assert_eq!(a[0].to_bytes(), b[0].to_bytes());
        assert_ne!(dev_address(&a[0]), dev_address(&a[1]));
    }

    #[test]
    fn test_allocations() {
        let config = GenesisConfig {
            timestamp: Some(0),
            dev_accounts: false,
            alloc: vec![
                GenesisAccount {
                    address: format!("0x{}", "11".repeat(20)),
                    balance: "1000".to_string(),
                },
                GenesisAccount {
                    address: format!("0x{}", "22".repeat(20)),
                    balance: "0x10".to_string(),
                },
            ],
        };
        let alloc = config.allocations().unwrap();
        assert_eq!(alloc, vec![(Address([0x11; 20]), 1000), (Address([0x22; 20]), 16)]);
    }

    #[test]
    fn test_invalid_allocation() {
        let config = GenesisConfig {
            alloc: vec![GenesisAccount {
                address: "0x1234".to_string(),
                balance: "1".to_string(),
            }],
            ..Default::default()
        };
        assert!(config.allocations().is_err());
    }
}
