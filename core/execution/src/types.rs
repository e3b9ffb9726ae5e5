// meridian/core/execution/src/types.rs

use meridian_consensus::types::{Address, Hash};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
}

/// Result of applying a single transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Hash,
    pub from: Address,
    pub to: Option<Address>,
    pub contract_address: Option<Address>,
    pub gas_used: u64,
    pub logs: Vec<Log>,
}

/// Per-block execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEnv {
    pub number: u64,
    pub coinbase: Address,
    pub gas_limit: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("Insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u128, have: u128 },

    #[error("Gas limit {limit} below intrinsic gas {required}")]
    IntrinsicGas { limit: u64, required: u64 },

    #[error("Block gas limit reached: {used} + {needed} > {limit}")]
    BlockGasExhausted { used: u64, needed: u64, limit: u64 },

    #[error("Arithmetic overflow")]
    Overflow,
}
