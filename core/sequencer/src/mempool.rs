// meridian/core/sequencer/src/mempool.rs

use meridian_consensus::types::{Address, Hash, Transaction};
use meridian_consensus::verify_transaction;
use meridian_execution::StateDB;
use priority_queue::PriorityQueue;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("Mempool is full")]
    Full,

    #[error("Transaction already exists: {0}")]
    DuplicateTransaction(Hash),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Wrong chain id: expected {expected}, got {got}")]
    WrongChainId { expected: u64, got: u64 },

    #[error("Gas price too low: minimum {min}, got {got}")]
    GasPriceTooLow { min: u64, got: u64 },

    #[error("Replacement underpriced: need at least {min}, got {got}")]
    ReplacementUnderpriced { min: u64, got: u64 },

    #[error("Sender limit exceeded")]
    SenderLimitExceeded,
}

/// Transaction priority for ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxPriority {
    pub gas_price: u64,
    /// Arrival sequence number
    pub seq: u64,
}

impl Ord for TxPriority {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher price first, then earlier arrival
        self.gas_price
            .cmp(&other.gas_price)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TxPriority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Mempool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolConfig {
    /// Maximum number of transactions in mempool
    pub max_size: usize,

    /// Maximum transactions per sender
    pub max_per_sender: usize,

    /// Minimum gas price
    pub min_gas_price: u64,

    /// Replacement gas price increase percentage
    pub replacement_factor: u64, // e.g., 110 = 10% increase required

    pub chain_id: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10_000,
            max_per_sender: 64,
            min_gas_price: 1,
            replacement_factor: 110,
            chain_id: 1337,
        }
    }
}

#[derive(Default)]
struct PoolInner {
    transactions: HashMap<Hash, Transaction>,
    priority_queue: PriorityQueue<Hash, TxPriority>,
    /// Pending transactions per sender keyed by nonce
    by_sender: HashMap<Address, BTreeMap<u64, Hash>>,
}

impl PoolInner {
    fn remove(&mut self, hash: &Hash) -> Option<Transaction> {
        let tx = self.transactions.remove(hash)?;
        self.priority_queue.remove(hash);
        let sender = tx.sender();
        if let Some(nonces) = self.by_sender.get_mut(&sender) {
            nonces.remove(&tx.nonce);
            if nonces.is_empty() {
                self.by_sender.remove(&sender);
            }
        }
        Some(tx)
    }
}

/// Ordinary pending transactions
pub struct Mempool {
    config: MempoolConfig,
    inner: RwLock<PoolInner>,
    seq: AtomicU64,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(PoolInner::default()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Add a transaction to the mempool
    pub async fn add_transaction(&self, tx: Transaction) -> Result<(), MempoolError> {
        self.validate_transaction(&tx)?;

        let tx_hash = tx.hash;
        let sender = tx.sender();
        let mut inner = self.inner.write().await;

        if inner.transactions.contains_key(&tx_hash) {
            return Err(MempoolError::DuplicateTransaction(tx_hash));
        }

        // Same sender and nonce: replace if paid enough more
        let existing = inner
            .by_sender
            .get(&sender)
            .and_then(|nonces| nonces.get(&tx.nonce))
            .copied();
        match existing {
            Some(old_hash) => {
                let old_price = inner
                    .transactions
                    .get(&old_hash)
                    .map(|old| old.gas_price)
                    .unwrap_or_default();
                let min = old_price.saturating_mul(self.config.replacement_factor) / 100;
                if tx.gas_price < min.max(old_price + 1) {
                    return Err(MempoolError::ReplacementUnderpriced {
                        min: min.max(old_price + 1),
                        got: tx.gas_price,
                    });
                }
                inner.remove(&old_hash);
                debug!("Replacing transaction {} with {}", old_hash, tx_hash);
            }
            None => {
                let sender_count = inner.by_sender.get(&sender).map_or(0, |n| n.len());
                if sender_count >= self.config.max_per_sender {
                    return Err(MempoolError::SenderLimitExceeded);
                }
                if inner.transactions.len() >= self.config.max_size {
                    Self::evict_lowest_priority(&mut inner, tx.gas_price)?;
                }
            }
        }

        let priority = TxPriority {
            gas_price: tx.gas_price,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
        };
        inner.priority_queue.push(tx_hash, priority);
        inner
            .by_sender
            .entry(sender)
            .or_default()
            .insert(tx.nonce, tx_hash);
        inner.transactions.insert(tx_hash, tx);

        info!(
            "Added transaction {} from {} to mempool ({} pending)",
            tx_hash,
            sender,
            inner.transactions.len()
        );
        Ok(())
    }

    fn validate_transaction(&self, tx: &Transaction) -> Result<(), MempoolError> {
        if tx.chain_id != self.config.chain_id {
            return Err(MempoolError::WrongChainId {
                expected: self.config.chain_id,
                got: tx.chain_id,
            });
        }
        if tx.gas_price < self.config.min_gas_price {
            return Err(MempoolError::GasPriceTooLow {
                min: self.config.min_gas_price,
                got: tx.gas_price,
            });
        }
        verify_transaction(tx).map_err(|e| {
            warn!("Rejected transaction {}: {}", tx.hash, e);
            MempoolError::InvalidTransaction(e.to_string())
        })
    }

    /// Only a strictly cheaper transaction is evicted
    fn evict_lowest_priority(inner: &mut PoolInner, incoming_price: u64) -> Result<(), MempoolError> {
        let lowest = inner
            .priority_queue
            .iter()
            .min_by_key(|(_, priority)| **priority)
            .map(|(hash, priority)| (*hash, *priority));

        match lowest {
            Some((hash, priority)) if priority.gas_price < incoming_price => {
                inner.remove(&hash);
                debug!("Evicted transaction {} from full mempool", hash);
                Ok(())
            }
            _ => Err(MempoolError::Full),
        }
    }

    /// Best executable transactions on top of `state`.
    ///
    /// Each sender contributes a gapless nonce run starting at its account
    /// nonce; across senders higher gas price goes first.
    pub async fn pending(&self, state: &StateDB, max_count: usize) -> Vec<Transaction> {
        let inner = self.inner.read().await;

        let mut sorted: Vec<(Hash, TxPriority)> = inner
            .priority_queue
            .iter()
            .map(|(h, p)| (*h, *p))
            .collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));

        let mut next_nonce: HashMap<Address, u64> = HashMap::new();
        let mut selected: Vec<Transaction> = Vec::new();
        let mut taken = std::collections::HashSet::new();

        loop {
            let mut progressed = false;
            for (hash, _) in &sorted {
                if selected.len() >= max_count {
                    break;
                }
                if taken.contains(hash) {
                    continue;
                }
                let Some(tx) = inner.transactions.get(hash) else {
                    continue;
                };
                let sender = tx.sender();
                let expected = *next_nonce
                    .entry(sender)
                    .or_insert_with(|| state.nonce(&sender));
                if tx.nonce == expected {
                    next_nonce.insert(sender, expected + 1);
                    taken.insert(*hash);
                    selected.push(tx.clone());
                    progressed = true;
                }
            }
            if !progressed || selected.len() >= max_count {
                break;
            }
        }

        selected
    }

    /// Drop included transactions and anything made unexecutable by `state`
    pub async fn remove_included(&self, included: &[Hash], state: &StateDB) -> usize {
        let mut inner = self.inner.write().await;
        let mut removed = 0;
        for hash in included {
            if inner.remove(hash).is_some() {
                removed += 1;
            }
        }

        let stale: Vec<Hash> = inner
            .transactions
            .values()
            .filter(|tx| tx.nonce < state.nonce(&tx.sender()))
            .map(|tx| tx.hash)
            .collect();
        for hash in &stale {
            inner.remove(hash);
        }
        removed += stale.len();

        if removed > 0 {
            debug!("Removed {} transactions from mempool", removed);
        }
        removed
    }

    pub async fn get_transaction(&self, hash: &Hash) -> Option<Transaction> {
        self.inner.read().await.transactions.get(hash).cloned()
    }

    pub async fn contains(&self, hash: &Hash) -> bool {
        self.inner.read().await.transactions.contains_key(hash)
    }

    /// Highest pending nonce + 1 for `sender`, if it has anything pending
    pub async fn next_nonce(&self, sender: &Address) -> Option<u64> {
        self.inner
            .read()
            .await
            .by_sender
            .get(sender)
            .and_then(|nonces| nonces.keys().next_back())
            .map(|n| n + 1)
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.transactions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use meridian_consensus::crypto::sign_transaction;
    use meridian_consensus::types::{PublicKey, Signature};
    use meridian_execution::{apply_transaction, BlockEnv};

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn address(seed: u8) -> Address {
        Address::from_public_key(&PublicKey::new(key(seed).verifying_key().to_bytes()))
    }

    fn create_test_tx(seed: u8, nonce: u64, gas_price: u64) -> Transaction {
        let mut tx = Transaction {
            hash: Hash::default(),
            chain_id: 1337,
            nonce,
            from: PublicKey::default(),
            to: Some(Address([0xee; 20])),
            value: 1,
            gas_limit: 21_000,
            gas_price,
            data: vec![],
            signature: Signature::default(),
        };
        sign_transaction(&mut tx, &key(seed));
        tx
    }

    #[tokio::test]
    async fn test_add_and_reject_duplicate() {
        let mempool = Mempool::new(MempoolConfig::default());
        let tx = create_test_tx(1, 0, 10);
        mempool.add_transaction(tx.clone()).await.unwrap();

        assert_eq!(
            mempool.add_transaction(tx.clone()).await,
            Err(MempoolError::DuplicateTransaction(tx.hash))
        );
        assert!(mempool.contains(&tx.hash).await);
        assert_eq!(mempool.next_nonce(&address(1)).await, Some(1));
    }

    #[tokio::test]
    async fn test_rejects_bad_signature_and_chain() {
        let mempool = Mempool::new(MempoolConfig::default());

        let mut tampered = create_test_tx(1, 0, 10);
        tampered.value = 1_000;
        tampered.hash = tampered.compute_hash();
        assert!(matches!(
            mempool.add_transaction(tampered).await,
            Err(MempoolError::InvalidTransaction(_))
        ));

        let mut other_chain = create_test_tx(1, 0, 10);
        other_chain.chain_id = 1;
        sign_transaction(&mut other_chain, &key(1));
        assert!(matches!(
            mempool.add_transaction(other_chain).await,
            Err(MempoolError::WrongChainId { expected: 1337, got: 1 })
        ));
    }

    #[tokio::test]
    async fn test_pending_orders_by_price_and_respects_nonces() {
        let mempool = Mempool::new(MempoolConfig::default());
        // Sender 1 pays more on its second tx, which must still follow the first
        mempool.add_transaction(create_test_tx(1, 0, 5)).await.unwrap();
        mempool.add_transaction(create_test_tx(1, 1, 50)).await.unwrap();
        mempool.add_transaction(create_test_tx(2, 0, 20)).await.unwrap();
        // Gap: nonce 3 without 2
        mempool.add_transaction(create_test_tx(3, 1, 100)).await.unwrap();

        let pending = mempool.pending(&StateDB::new(), 10).await;
        let order: Vec<(Address, u64)> = pending.iter().map(|t| (t.sender(), t.nonce)).collect();
        assert_eq!(
            order,
            vec![(address(2), 0), (address(1), 0), (address(1), 1)]
        );
    }

    #[tokio::test]
    async fn test_replacement_needs_higher_price() {
        let mempool = Mempool::new(MempoolConfig::default());
        mempool.add_transaction(create_test_tx(1, 0, 100)).await.unwrap();

        assert!(matches!(
            mempool.add_transaction(create_test_tx(1, 0, 105)).await,
            Err(MempoolError::ReplacementUnderpriced { min: 110, got: 105 })
        ));

        let better = create_test_tx(1, 0, 110);
        mempool.add_transaction(better.clone()).await.unwrap();
        assert_eq!(mempool.len().await, 1);
        assert!(mempool.contains(&better.hash).await);
    }

    #[tokio::test]
    async fn test_remove_included_drops_stale_nonces() {
        let mempool = Mempool::new(MempoolConfig::default());
        let first = create_test_tx(1, 0, 10);
        let outbid = create_test_tx(2, 0, 10);
        mempool.add_transaction(first.clone()).await.unwrap();
        mempool.add_transaction(outbid).await.unwrap();

        // Sender 2's nonce 0 was consumed by a transaction this pool never saw
        let mut state = StateDB::new();
        state.set_balance(address(2), 1_000_000);
        let env = BlockEnv {
            number: 1,
            coinbase: Address::zero(),
            gas_limit: 30_000_000,
        };
        apply_transaction(&mut state, &env, &create_test_tx(2, 0, 1)).unwrap();

        let removed = mempool.remove_included(&[first.hash], &state).await;
        assert_eq!(removed, 2);
        assert!(mempool.is_empty().await);
    }

    #[tokio::test]
    async fn test_full_pool_evicts_cheaper() {
        let mempool = Mempool::new(MempoolConfig {
            max_size: 2,
            ..Default::default()
        });
        mempool.add_transaction(create_test_tx(1, 0, 5)).await.unwrap();
        mempool.add_transaction(create_test_tx(2, 0, 10)).await.unwrap();

        assert_eq!(
            mempool.add_transaction(create_test_tx(3, 0, 1)).await,
            Err(MempoolError::Full)
        );
        mempool.add_transaction(create_test_tx(4, 0, 20)).await.unwrap();
        assert_eq!(mempool.len().await, 2);
        assert_eq!(mempool.next_nonce(&address(1)).await, None);
    }
}
