// meridian/core/sequencer/src/bundle.rs

use meridian_consensus::types::{keccak256, Hash, Transaction};
use serde::{Deserialize, Serialize};

/// An ordered set of signed transactions that must land together, in order,
/// in a block built on `parent_hash` before `deadline`.
///
/// Bundles are shared between pipelines as `Arc<MegaBundle>` and never
/// mutated after submission. Resubmitting against another head produces a
/// new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MegaBundle {
    pub transactions: Vec<Transaction>,
    /// Unix timestamp in seconds
    pub deadline: u64,
    /// Minimum value the coinbase must gain from the bundle
    pub min_coinbase_diff: u128,
    pub parent_hash: Hash,
}

impl MegaBundle {
    pub fn new(
        transactions: Vec<Transaction>,
        deadline: u64,
        min_coinbase_diff: u128,
        parent_hash: Hash,
    ) -> Self {
        Self {
            transactions,
            deadline,
            min_coinbase_diff,
            parent_hash,
        }
    }

    /// Identity of the bundle: keccak over its transaction hashes and terms
    pub fn hash(&self) -> Hash {
        let mut buf = Vec::with_capacity(self.transactions.len() * 32 + 72);
        for tx in &self.transactions {
            buf.extend_from_slice(tx.hash.as_bytes());
        }
        buf.extend_from_slice(&self.deadline.to_be_bytes());
        buf.extend_from_slice(&self.min_coinbase_diff.to_be_bytes());
        buf.extend_from_slice(self.parent_hash.as_bytes());
        keccak256(&buf)
    }

    pub fn tx_hashes(&self) -> Vec<Hash> {
        self.transactions.iter().map(|tx| tx.hash).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// The deadline itself is still valid
    pub fn is_expired(&self, now: u64) -> bool {
        now > self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_consensus::types::{PublicKey, Signature};
    use proptest::prelude::*;

    fn tx(seed: u8) -> Transaction {
        let mut tx = Transaction {
            hash: Hash::default(),
            chain_id: 1337,
            nonce: seed as u64,
            from: PublicKey::default(),
            to: None,
            value: 0,
            gas_limit: 21_000,
            gas_price: 1,
            data: vec![seed],
            signature: Signature::default(),
        };
        tx.hash = tx.compute_hash();
        tx
    }

    #[test]
    fn test_deadline_is_inclusive() {
        let bundle = MegaBundle::new(vec![tx(1)], 100, 0, Hash::default());
        assert!(!bundle.is_expired(99));
        assert!(!bundle.is_expired(100));
        assert!(bundle.is_expired(101));
    }

    #[test]
    fn test_tx_hashes_keep_order() {
        let txs = vec![tx(3), tx(1), tx(2)];
        let expected: Vec<Hash> = txs.iter().map(|t| t.hash).collect();
        let bundle = MegaBundle::new(txs, 0, 0, Hash::default());
        assert_eq!(bundle.tx_hashes(), expected);
    }

    proptest! {
        #[test]
        fn prop_hash_binds_terms(deadline in any::<u64>(), diff in any::<u128>(), parent in any::<[u8; 32]>()) {
            let bundle = MegaBundle::new(vec![tx(1), tx(2)], deadline, diff, Hash::new(parent));

            let mut later = bundle.clone();
            later.deadline = deadline.wrapping_add(1);
            prop_assert_ne!(bundle.hash(), later.hash());

            let mut cheaper = bundle.clone();
            cheaper.min_coinbase_diff = diff.wrapping_add(1);
            prop_assert_ne!(bundle.hash(), cheaper.hash());

            let mut reordered = bundle.clone();
            reordered.transactions.reverse();
            prop_assert_ne!(bundle.hash(), reordered.hash());

            prop_assert_eq!(bundle.hash(), bundle.clone().hash());
        }
    }
}
