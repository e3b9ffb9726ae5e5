// meridian/core/storage/src/chain.rs

//! In-memory canonical chain.
//!
//! Blocks are re-executed on import so receipts, payment events and the
//! post-state of every recent block are available to the miner and the RPC
//! layer. Each successful import is announced on a broadcast channel of
//! [`HeadNotification`]s.

use meridian_consensus::types::{
    transactions_root, Address, Block, ChainConfig, Hash, HeadNotification, Header,
};
use meridian_execution::{
    payments_in, BlockEnv, BlockExecutor, ExecutionError, PaymentEvent, Receipt, StateDB,
};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Number of recent post-states kept for block assembly
pub const STATE_HISTORY: usize = 256;

const HEAD_CHANNEL_CAPACITY: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("Block {block} does not extend head {head}")]
    NotExtendingHead { head: Hash, block: Hash },

    #[error("Block number {got} does not follow head number {head}")]
    InvalidNumber { head: u64, got: u64 },

    #[error("Block hash mismatch")]
    HashMismatch,

    #[error("Transactions root mismatch")]
    TxRootMismatch,

    #[error("Gas used mismatch: header {header}, executed {executed}")]
    GasUsedMismatch { header: u64, executed: u64 },

    #[error("Transaction {index} failed: {source}")]
    Execution {
        index: usize,
        #[source]
        source: ExecutionError,
    },

    #[error("State for block {0} is no longer available")]
    StateUnavailable(Hash),
}

struct ChainInner {
    blocks: Vec<Block>,
    by_hash: HashMap<Hash, u64>,
    receipts: HashMap<Hash, Vec<Receipt>>,
    tx_index: HashMap<Hash, (u64, usize)>,
    states: HashMap<Hash, StateDB>,
    state_order: VecDeque<Hash>,
}

impl ChainInner {
    fn head(&self) -> &Block {
        // The genesis block is inserted at construction
        &self.blocks[self.blocks.len() - 1]
    }

    fn remember_state(&mut self, hash: Hash, state: StateDB) {
        self.states.insert(hash, state);
        self.state_order.push_back(hash);
        while self.state_order.len() > STATE_HISTORY {
            if let Some(old) = self.state_order.pop_front() {
                self.states.remove(&old);
            }
        }
    }
}

/// Canonical chain with head notifications
pub struct ChainStore {
    config: ChainConfig,
    inner: RwLock<ChainInner>,
    heads_tx: broadcast::Sender<HeadNotification>,
}

impl ChainStore {
    /// Create a chain holding only the genesis block
    pub fn new(config: ChainConfig, alloc: Vec<(Address, u128)>, genesis_timestamp: u64) -> Self {
        let genesis = Block {
            header: Header::genesis(config.genesis_gas_limit, genesis_timestamp),
            transactions: vec![],
        };
        let genesis_hash = genesis.hash();

        let mut inner = ChainInner {
            blocks: vec![genesis],
            by_hash: HashMap::from([(genesis_hash, 0)]),
            receipts: HashMap::from([(genesis_hash, vec![])]),
            tx_index: HashMap::new(),
            states: HashMap::new(),
            state_order: VecDeque::new(),
        };
        inner.remember_state(genesis_hash, StateDB::with_alloc(alloc));

        info!("Initialized chain {} with genesis {}", config.chain_id, genesis_hash);

        let (heads_tx, _) = broadcast::channel(HEAD_CHANNEL_CAPACITY);
        Self {
            config,
            inner: RwLock::new(inner),
            heads_tx,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Receiver for every future head
    pub fn subscribe_heads(&self) -> broadcast::Receiver<HeadNotification> {
        self.heads_tx.subscribe()
    }

    pub fn head(&self) -> Header {
        self.inner.read().head().header.clone()
    }

    pub fn height(&self) -> u64 {
        self.inner.read().head().header.number
    }

    pub fn genesis_hash(&self) -> Hash {
        self.inner.read().blocks[0].hash()
    }

    pub fn block_by_number(&self, number: u64) -> Option<Block> {
        self.inner.read().blocks.get(number as usize).cloned()
    }

    pub fn block_by_hash(&self, hash: &Hash) -> Option<Block> {
        let inner = self.inner.read();
        let number = *inner.by_hash.get(hash)?;
        inner.blocks.get(number as usize).cloned()
    }

    /// Post-state of a recent block
    pub fn state_at(&self, hash: &Hash) -> Result<StateDB, ChainError> {
        self.inner
            .read()
            .states
            .get(hash)
            .cloned()
            .ok_or(ChainError::StateUnavailable(*hash))
    }

    /// Post-state of the current head
    pub fn latest_state(&self) -> StateDB {
        let inner = self.inner.read();
        let head = inner.head().hash();
        // Head state is never evicted
        inner.states.get(&head).cloned().unwrap_or_default()
    }

    pub fn receipts(&self, block: &Hash) -> Option<Vec<Receipt>> {
        self.inner.read().receipts.get(block).cloned()
    }

    /// Payment events recorded in the block at `number`
    pub fn payments(&self, number: u64) -> Option<Vec<PaymentEvent>> {
        let inner = self.inner.read();
        let block = inner.blocks.get(number as usize)?;
        inner.receipts.get(&block.hash()).map(|r| payments_in(r))
    }

    /// `(block number, index)` of an included transaction
    pub fn transaction_location(&self, tx_hash: &Hash) -> Option<(u64, usize)> {
        self.inner.read().tx_index.get(tx_hash).copied()
    }

    /// Import a sealed block on top of the current head
    pub fn import_block(&self, block: Block) -> Result<HeadNotification, ChainError> {
        let notification = {
            let mut inner = self.inner.write();
            let head = inner.head().header.clone();

            if block.parent_hash() != head.hash {
                return Err(ChainError::NotExtendingHead {
                    head: head.hash,
                    block: block.hash(),
                });
            }
            if block.number() != head.number + 1 {
                return Err(ChainError::InvalidNumber {
                    head: head.number,
                    got: block.number(),
                });
            }
            if block.header.compute_hash() != block.hash() {
                return Err(ChainError::HashMismatch);
            }
            if transactions_root(&block.transactions) != block.header.tx_root {
                return Err(ChainError::TxRootMismatch);
            }

            let parent_state = inner
                .states
                .get(&head.hash)
                .cloned()
                .ok_or(ChainError::StateUnavailable(head.hash))?;

            let mut executor = BlockExecutor::new(
                parent_state,
                BlockEnv {
                    number: block.number(),
                    coinbase: block.header.coinbase,
                    gas_limit: block.header.gas_limit,
                },
            );
            for (index, tx) in block.transactions.iter().enumerate() {
                executor
                    .apply(tx)
                    .map_err(|source| ChainError::Execution { index, source })?;
            }
            let outcome = executor.finish();

            if outcome.gas_used != block.header.gas_used {
                return Err(ChainError::GasUsedMismatch {
                    header: block.header.gas_used,
                    executed: outcome.gas_used,
                });
            }

            let hash = block.hash();
            let number = block.number();
            for (index, tx) in block.transactions.iter().enumerate() {
                inner.tx_index.insert(tx.hash, (number, index));
            }
            inner.receipts.insert(hash, outcome.receipts);
            inner.remember_state(hash, outcome.state);
            inner.by_hash.insert(hash, number);

            let notification = HeadNotification::from(&block.header);
            debug!(
                "Imported block {} at height {} with {} transactions",
                hash,
                number,
                block.transactions.len()
            );
            inner.blocks.push(block);
            notification
        };

        // Nobody listening is fine
        let _ = self.heads_tx.send(notification.clone());
        Ok(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_consensus::engine::{Engine, InstantSeal};
    use meridian_consensus::types::Transaction;

    fn empty_child(chain: &ChainStore) -> Block {
        let head = chain.head();
        let header = Header {
            hash: Hash::default(),
            parent_hash: head.hash,
            number: head.number + 1,
            timestamp: head.timestamp + 1,
            coinbase: Address([1; 20]),
            extra: vec![],
            gas_limit: head.gas_limit,
            gas_used: 0,
            tx_root: Hash::default(),
        };
        InstantSeal.seal(header, Vec::<Transaction>::new()).unwrap()
    }

    #[test]
    fn test_genesis_state() {
        let a = Address([5; 20]);
        let chain = ChainStore::new(ChainConfig::default(), vec![(a, 42)], 0);
        assert_eq!(chain.height(), 0);
        assert_eq!(chain.latest_state().balance(&a), 42);
        assert_eq!(chain.head().hash, chain.genesis_hash());
    }

    #[tokio::test]
    async fn test_import_broadcasts_head() {
        let chain = ChainStore::new(ChainConfig::default(), vec![], 0);
        let mut heads = chain.subscribe_heads();

        let block = empty_child(&chain);
        let hash = block.hash();
        chain.import_block(block).unwrap();

        let head = heads.recv().await.unwrap();
        assert_eq!(head.number, 1);
        assert_eq!(head.hash, hash);
        assert_eq!(head.parent_hash, chain.genesis_hash());
        assert_eq!(chain.block_by_hash(&hash).unwrap().number(), 1);
    }

    #[test]
    fn test_sibling_is_rejected() {
        let chain = ChainStore::new(ChainConfig::default(), vec![], 0);
        let first = empty_child(&chain);
        let mut sibling = first.clone();
        sibling.header.coinbase = Address([2; 20]);
        sibling.header.hash = sibling.header.compute_hash();

        chain.import_block(first).unwrap();
        assert!(matches!(
            chain.import_block(sibling),
            Err(ChainError::NotExtendingHead { .. })
        ));
    }

    #[test]
    fn test_tampered_block_is_rejected() {
        let chain = ChainStore::new(ChainConfig::default(), vec![], 0);
        let mut block = empty_child(&chain);
        block.header.timestamp += 1;
        assert_eq!(chain.import_block(block), Err(ChainError::HashMismatch));
    }
}
