// meridian/core/consensus/src/engine.rs

//! Sealing engine capability.
//!
//! Pipelines hand an assembled header and body to an [`Engine`] and get back
//! a sealed [`Block`]. The consensus algorithm behind it is opaque to the
//! block-production core.

use crate::types::{transactions_root, Block, Header, Transaction};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Header number {got} does not follow parent number {parent}")]
    InvalidNumber { parent: u64, got: u64 },

    #[error("Gas used {used} exceeds gas limit {limit}")]
    GasLimitExceeded { used: u64, limit: u64 },

    #[error("Extra data too long: {0} bytes")]
    ExtraTooLong(usize),

    #[error("Sealing failed: {0}")]
    SealFailed(String),
}

/// Maximum size of the header extra-data field
pub const MAX_EXTRA_DATA_SIZE: usize = 32;

/// Turns an assembled block body into a sealed block
pub trait Engine: Send + Sync {
    fn seal(&self, header: Header, transactions: Vec<Transaction>) -> Result<Block, EngineError>;
}

/// Development engine that seals immediately
#[derive(Debug, Default, Clone)]
pub struct InstantSeal;

impl Engine for InstantSeal {
    fn seal(
        &self,
        mut header: Header,
        transactions: Vec<Transaction>,
    ) -> Result<Block, EngineError> {
        if header.number == 0 {
            return Err(EngineError::InvalidNumber {
                parent: 0,
                got: header.number,
            });
        }
        if header.gas_used > header.gas_limit {
            return Err(EngineError::GasLimitExceeded {
                used: header.gas_used,
                limit: header.gas_limit,
            });
        }
        if header.extra.len() > MAX_EXTRA_DATA_SIZE {
            return Err(EngineError::ExtraTooLong(header.extra.len()));
        }

        header.tx_root = transactions_root(&transactions);
        header.hash = header.compute_hash();

        Ok(Block {
            header,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Address, Hash};

    fn child_header(parent: &Header) -> Header {
        Header {
            hash: Hash::default(),
            parent_hash: parent.hash,
            number: parent.number + 1,
            timestamp: parent.timestamp + 1,
            coinbase: Address([1; 20]),
            extra: vec![],
            gas_limit: parent.gas_limit,
            gas_used: 0,
            tx_root: Hash::default(),
        }
    }

    #[test]
    fn test_instant_seal_sets_hash() {
        let genesis = Header::genesis(30_000_000, 0);
        let block = InstantSeal.seal(child_header(&genesis), vec![]).unwrap();
        assert_eq!(block.hash(), block.header.compute_hash());
        assert_eq!(block.parent_hash(), genesis.hash);
    }

    #[test]
    fn test_instant_seal_rejects_long_extra() {
        let genesis = Header::genesis(30_000_000, 0);
        let mut header = child_header(&genesis);
        header.extra = vec![0; MAX_EXTRA_DATA_SIZE + 1];
        assert_eq!(
            InstantSeal.seal(header, vec![]),
            Err(EngineError::ExtraTooLong(MAX_EXTRA_DATA_SIZE + 1))
        );
    }

    #[test]
    fn test_instant_seal_rejects_overfull_block() {
        let genesis = Header::genesis(21_000, 0);
        let mut header = child_header(&genesis);
        header.gas_used = 42_000;
        assert!(matches!(
            InstantSeal.seal(header, vec![]),
            Err(EngineError::GasLimitExceeded { .. })
        ));
    }
}
