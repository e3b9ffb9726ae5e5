// meridian/core/api/src/types/response.rs

use super::request::{encode_bytes, encode_hash, encode_quantity};
use meridian_consensus::types::{Block, HeadNotification, Header, Transaction};
use meridian_execution::{PaymentEvent, Receipt};
use meridian_sequencer::{PipelinePolicy, PipelineSettings, StatsSnapshot};
use serde::Serialize;

/// Transaction as returned by `eth_getBlockByNumber(_, true)`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub hash: String,
    pub nonce: String,
    pub from: String,
    pub to: Option<String>,
    pub value: String,
    pub gas: String,
    pub gas_price: String,
    pub input: String,
    pub chain_id: String,
}

impl From<&Transaction> for TransactionResponse {
    fn from(tx: &Transaction) -> Self {
        Self {
            hash: encode_hash(&tx.hash),
            nonce: encode_quantity(tx.nonce as u128),
            from: tx.sender().to_hex(),
            to: tx.to.map(|to| to.to_hex()),
            value: encode_quantity(tx.value),
            gas: encode_quantity(tx.gas_limit as u128),
            gas_price: encode_quantity(tx.gas_price as u128),
            input: encode_bytes(&tx.data),
            chain_id: encode_quantity(tx.chain_id as u128),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum BlockTransactions {
    Hashes(Vec<String>),
    Full(Vec<TransactionResponse>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockResponse {
    pub number: String,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: String,
    pub miner: String,
    pub extra_data: String,
    pub gas_limit: String,
    pub gas_used: String,
    pub transactions_root: String,
    pub transactions: BlockTransactions,
}

impl BlockResponse {
    pub fn new(block: &Block, full: bool) -> Self {
        let transactions = if full {
            BlockTransactions::Full(block.transactions.iter().map(Into::into).collect())
        } else {
            BlockTransactions::Hashes(block.transactions.iter().map(|tx| encode_hash(&tx.hash)).collect())
        };
        let header = &block.header;
        Self {
            number: encode_quantity(header.number as u128),
            hash: encode_hash(&header.hash),
            parent_hash: encode_hash(&header.parent_hash),
            timestamp: encode_quantity(header.timestamp as u128),
            miner: header.coinbase.to_hex(),
            extra_data: encode_bytes(&header.extra),
            gas_limit: encode_quantity(header.gas_limit as u128),
            gas_used: encode_quantity(header.gas_used as u128),
            transactions_root: encode_hash(&header.tx_root),
            transactions,
        }
    }
}

/// Payload of a `newHeads` notification
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadResponse {
    pub number: String,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: String,
    pub miner: String,
}

impl From<&HeadNotification> for HeadResponse {
    fn from(head: &HeadNotification) -> Self {
        Self {
            number: encode_quantity(head.number as u128),
            hash: encode_hash(&head.hash),
            parent_hash: encode_hash(&head.parent_hash),
            timestamp: encode_quantity(head.timestamp as u128),
            miner: head.coinbase.to_hex(),
        }
    }
}

impl From<&Header> for HeadResponse {
    fn from(header: &Header) -> Self {
        Self::from(&HeadNotification::from(header))
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogResponse {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptResponse {
    pub transaction_hash: String,
    pub block_number: String,
    pub block_hash: String,
    pub transaction_index: String,
    pub from: String,
    pub to: Option<String>,
    pub contract_address: Option<String>,
    pub gas_used: String,
    pub status: String,
    pub logs: Vec<LogResponse>,
}

impl ReceiptResponse {
    pub fn new(receipt: &Receipt, block: &Block, index: usize) -> Self {
        Self {
            transaction_hash: encode_hash(&receipt.tx_hash),
            block_number: encode_quantity(block.number() as u128),
            block_hash: encode_hash(&block.hash()),
            transaction_index: encode_quantity(index as u128),
            from: receipt.from.to_hex(),
            to: receipt.to.map(|to| to.to_hex()),
            contract_address: receipt.contract_address.map(|a| a.to_hex()),
            gas_used: encode_quantity(receipt.gas_used as u128),
            // Failed transactions are never included
            status: "0x1".to_string(),
            logs: receipt
                .logs
                .iter()
                .map(|log| LogResponse {
                    address: log.address.to_hex(),
                    topics: log.topics.iter().map(encode_hash).collect(),
                    data: encode_bytes(&log.data),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResponse {
    pub coinbase: String,
    pub payer: String,
    pub amount: String,
}

impl From<&PaymentEvent> for PaymentResponse {
    fn from(event: &PaymentEvent) -> Self {
        Self {
            coinbase: event.coinbase.to_hex(),
            payer: event.payer.to_hex(),
            amount: encode_quantity(event.amount),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    pub policy: PipelinePolicy,
    pub extra_data: String,
    pub etherbase: String,
    pub recommit_ms: u64,
    pub preseal: bool,
    pub gas_limit: String,
    pub worker_alive: bool,
    pub stats: StatsSnapshot,
}

impl PipelineStatus {
    pub fn new(
        policy: PipelinePolicy,
        settings: &PipelineSettings,
        worker_alive: bool,
        stats: StatsSnapshot,
    ) -> Self {
        Self {
            policy,
            worker_alive,
            extra_data: encode_bytes(&settings.extra),
            etherbase: settings.etherbase.to_hex(),
            recommit_ms: settings.recommit.as_millis() as u64,
            preseal: settings.preseal,
            gas_limit: encode_quantity(settings.gas_limit as u128),
            stats,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerStatusResponse {
    pub running: bool,
    pub closed: bool,
    pub pipelines: Vec<PipelineStatus>,
}
