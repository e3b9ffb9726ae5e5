// meridian/cli/src/client.rs
//
// JSON-RPC access to a Meridian node

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use meridian_api::types::request::{encode_bytes, parse_hash, parse_u128, parse_u64};
use meridian_api::MegaBundleRequest;
use meridian_consensus::types::{Address, Hash, HeadNotification, Transaction};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

/// Payment recorded by the payment contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub coinbase: Address,
    pub payer: Address,
    pub amount: u128,
}

/// Node calls made by the checks
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> Result<u64>;

    /// Next nonce, counting pending transactions
    async fn nonce(&self, address: &Address) -> Result<u64>;

    async fn balance(&self, address: &Address) -> Result<u128>;

    async fn latest_head(&self) -> Result<HeadNotification>;

    async fn send_transaction(&self, tx: &Transaction) -> Result<Hash>;

    async fn send_mega_bundle(&self, bundle: &MegaBundleRequest) -> Result<Hash>;

    /// Transaction hashes of the block at `number`, `None` if it does not exist
    async fn block_transactions(&self, number: u64) -> Result<Option<Vec<Hash>>>;

    async fn payments(&self, number: u64) -> Result<Vec<Payment>>;
}

/// HTTP JSON-RPC client
pub struct RpcClient {
    endpoint: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// `meridian_minerStatus` as raw JSON
    pub async fn miner_status(&self) -> Result<Value> {
        self.call("meridian_minerStatus", json!([])).await
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response: Value = self
            .http
            .post(&self.endpoint)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": id
            }))
            .send()
            .await
            .context("Failed to connect to RPC endpoint")?
            .json()
            .await
            .with_context(|| format!("Invalid response to {}", method))?;

        if let Some(error) = response.get("error") {
            bail!(
                "{} failed: {}",
                method,
                error["message"].as_str().unwrap_or("Unknown error")
            );
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| anyhow!("Unexpected response to {}", method))
    }
}

fn quantity(value: &Value) -> Result<u64> {
    parse_u64(value).map_err(|e| anyhow!(e.to_string()))
}

fn quantity_u128(value: &Value) -> Result<u128> {
    let s = value
        .as_str()
        .ok_or_else(|| anyhow!("Expected quantity, got {}", value))?;
    parse_u128(s).map_err(|e| anyhow!(e.to_string()))
}

fn hash(value: &Value) -> Result<Hash> {
    let s = value
        .as_str()
        .ok_or_else(|| anyhow!("Expected hash, got {}", value))?;
    parse_hash(s).map_err(|e| anyhow!(e.to_string()))
}

fn address(value: &Value) -> Result<Address> {
    value
        .as_str()
        .and_then(Address::from_hex)
        .ok_or_else(|| anyhow!("Expected address, got {}", value))
}

/// Parse a block or `newHeads` payload
pub fn parse_head(value: &Value) -> Result<HeadNotification> {
    Ok(HeadNotification {
        number: quantity(&value["number"])?,
        hash: hash(&value["hash"])?,
        parent_hash: hash(&value["parentHash"])?,
        timestamp: quantity(&value["timestamp"])?,
        coinbase: address(&value["miner"])?,
    })
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn chain_id(&self) -> Result<u64> {
        quantity(&self.call("eth_chainId", json!([])).await?)
    }

    async fn nonce(&self, address: &Address) -> Result<u64> {
        let result = self
            .call("eth_getTransactionCount", json!([address.to_hex(), "pending"]))
            .await?;
        quantity(&result)
    }

    async fn balance(&self, address: &Address) -> Result<u128> {
        let result = self
            .call("eth_getBalance", json!([address.to_hex(), "latest"]))
            .await?;
        quantity_u128(&result)
    }

    async fn latest_head(&self) -> Result<HeadNotification> {
        let block = self
            .call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        parse_head(&block)
    }

    async fn send_transaction(&self, tx: &Transaction) -> Result<Hash> {
        let result = self
            .call("eth_sendRawTransaction", json!([encode_bytes(&tx.encode())]))
            .await?;
        hash(&result)
    }

    async fn send_mega_bundle(&self, bundle: &MegaBundleRequest) -> Result<Hash> {
        hash(&self.call("eth_sendMegaBundle", json!([bundle])).await?)
    }

    async fn block_transactions(&self, number: u64) -> Result<Option<Vec<Hash>>> {
        let block = self
            .call("eth_getBlockByNumber", json!([format!("0x{:x}", number), false]))
            .await?;
        if block.is_null() {
            return Ok(None);
        }
        block["transactions"]
            .as_array()
            .ok_or_else(|| anyhow!("Block {} has no transaction list", number))?
            .iter()
            .map(hash)
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    async fn payments(&self, number: u64) -> Result<Vec<Payment>> {
        let result = self.call("meridian_getPayments", json!([number])).await?;
        let Some(events) = result.as_array() else {
            return Ok(vec![]);
        };
        events
            .iter()
            .map(|event| {
                Ok(Payment {
                    coinbase: address(&event["coinbase"])?,
                    payer: address(&event["payer"])?,
                    amount: quantity_u128(&event["amount"])?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_head() {
        let value = json!({
            "number": "0x2a",
            "hash": format!("0x{}", "01".repeat(32)),
            "parentHash": format!("0x{}", "02".repeat(32)),
            "timestamp": "0x64",
            "miner": format!("0x{}", "cb".repeat(20)),
        });
        let head = parse_head(&value).unwrap();
        assert_eq!(head.number, 42);
        assert_eq!(head.parent_hash, Hash::new([2; 32]));
        assert_eq!(head.timestamp, 100);
        assert_eq!(head.coinbase, Address([0xcb; 20]));

        assert!(parse_head(&json!({"number": "0x1"})).is_err());
    }
}
