// meridian/core/api/src/types/request.rs

use super::error::ApiError;
use meridian_consensus::types::{Address, Hash, Transaction};
use meridian_sequencer::MegaBundle;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Parameters of `eth_sendMegaBundle`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MegaBundleRequest {
    /// Hex-encoded signed transactions, in inclusion order
    pub transaction_list: Vec<String>,
    /// Deadline, unix seconds
    #[serde(deserialize_with = "deserialize_quantity")]
    pub timestamp: u64,
    /// Minimum coinbase payment, hex or decimal
    pub coinbase_diff: String,
    pub parent_hash: String,
}

impl MegaBundleRequest {
    pub fn from_bundle(bundle: &MegaBundle) -> Self {
        Self {
            transaction_list: bundle
                .transactions
                .iter()
                .map(|tx| encode_bytes(&tx.encode()))
                .collect(),
            timestamp: bundle.deadline,
            coinbase_diff: encode_quantity(bundle.min_coinbase_diff),
            parent_hash: encode_hash(&bundle.parent_hash),
        }
    }

    pub fn into_bundle(self) -> Result<MegaBundle, ApiError> {
        let transactions = self
            .transaction_list
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                decode_transaction(raw)
                    .map_err(|e| ApiError::invalid(format!("transaction {}: {}", i, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MegaBundle::new(
            transactions,
            self.timestamp,
            parse_u128(&self.coinbase_diff)?,
            parse_hash(&self.parent_hash)?,
        ))
    }
}

/// Block selector used by the `eth_*` read methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Earliest,
    Latest,
    Pending,
    Number(u64),
}

impl BlockTag {
    pub fn parse(value: Option<&Value>) -> Result<Self, ApiError> {
        match value {
            None | Some(Value::Null) => Ok(BlockTag::Latest),
            Some(Value::String(s)) if s == "latest" => Ok(BlockTag::Latest),
            Some(Value::String(s)) if s == "earliest" => Ok(BlockTag::Earliest),
            Some(Value::String(s)) if s == "pending" => Ok(BlockTag::Pending),
            Some(other) => parse_u64(other).map(BlockTag::Number),
        }
    }
}

fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

/// JSON number, `0x` hex string or decimal string
pub fn parse_u64(value: &Value) -> Result<u64, ApiError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ApiError::invalid(format!("Invalid quantity {}", n))),
        Value::String(s) if s.starts_with("0x") => u64::from_str_radix(strip_0x(s), 16)
            .map_err(|_| ApiError::invalid(format!("Invalid quantity {}", s))),
        Value::String(s) => s
            .parse()
            .map_err(|_| ApiError::invalid(format!("Invalid quantity {}", s))),
        other => Err(ApiError::invalid(format!("Invalid quantity {}", other))),
    }
}

pub fn parse_u128(s: &str) -> Result<u128, ApiError> {
    let parsed = if s.starts_with("0x") {
        u128::from_str_radix(strip_0x(s), 16)
    } else {
        s.parse()
    };
    parsed.map_err(|_| ApiError::invalid(format!("Invalid quantity {}", s)))
}

pub fn parse_hash(s: &str) -> Result<Hash, ApiError> {
    Hash::from_hex(s).ok_or_else(|| ApiError::invalid(format!("Invalid hash {}", s)))
}

pub fn parse_address(s: &str) -> Result<Address, ApiError> {
    Address::from_hex(s).ok_or_else(|| ApiError::invalid(format!("Invalid address {}", s)))
}

pub fn decode_transaction(raw: &str) -> Result<Transaction, String> {
    let bytes = hex::decode(strip_0x(raw)).map_err(|e| e.to_string())?;
    Transaction::decode(&bytes).map_err(|e| e.to_string())
}

pub fn encode_quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

pub fn encode_bytes(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn encode_hash(hash: &Hash) -> String {
    format!("0x{}", hash.to_hex())
}

fn deserialize_quantity<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_u64(&value).map_err(serde::de::Error::custom)
}
