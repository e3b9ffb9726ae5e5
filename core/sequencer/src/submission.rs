// meridian/core/sequencer/src/submission.rs

use crate::bundle::MegaBundle;
use meridian_consensus::types::{Hash, Header};
use meridian_consensus::verify_transaction;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Why a bundle was refused at submission
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    #[error("bundle has no transactions")]
    EmptyBundle,

    #[error("transaction {index} is malformed: {reason}")]
    MalformedTransaction { index: usize, reason: String },

    #[error("transaction {index} is for chain {got}, expected {expected}")]
    WrongChainId {
        index: usize,
        expected: u64,
        got: u64,
    },

    #[error("deadline {deadline} is in the past (now {now})")]
    DeadlinePassed { deadline: u64, now: u64 },

    #[error("bundle targets parent {got}, current head is {expected}")]
    ParentMismatch { expected: Hash, got: Hash },
}

/// Acknowledgement that a bundle reached the intake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleReceipt {
    pub bundle_hash: Hash,
    /// Pipelines the bundle was delivered to
    pub subscribers: usize,
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Checks run before a bundle is published. Cheapest first.
pub fn validate_bundle(
    bundle: &MegaBundle,
    head: &Header,
    chain_id: u64,
    now: u64,
) -> Result<(), RejectReason> {
    if bundle.is_empty() {
        return Err(RejectReason::EmptyBundle);
    }
    if bundle.is_expired(now) {
        return Err(RejectReason::DeadlinePassed {
            deadline: bundle.deadline,
            now,
        });
    }
    if bundle.parent_hash != head.hash {
        return Err(RejectReason::ParentMismatch {
            expected: head.hash,
            got: bundle.parent_hash,
        });
    }
    for (index, tx) in bundle.transactions.iter().enumerate() {
        if tx.chain_id != chain_id {
            return Err(RejectReason::WrongChainId {
                index,
                expected: chain_id,
                got: tx.chain_id,
            });
        }
        verify_transaction(tx).map_err(|e| RejectReason::MalformedTransaction {
            index,
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use meridian_consensus::crypto::sign_transaction;
    use meridian_consensus::types::{Address, PublicKey, Signature, Transaction};

    fn signed(chain_id: u64) -> Transaction {
        let mut tx = Transaction {
            hash: Hash::default(),
            chain_id,
            nonce: 0,
            from: PublicKey::default(),
            to: Some(Address([1; 20])),
            value: 1,
            gas_limit: 21_000,
            gas_price: 1,
            data: vec![],
            signature: Signature::default(),
        };
        sign_transaction(&mut tx, &SigningKey::from_bytes(&[4; 32]));
        tx
    }

    fn head() -> Header {
        Header::genesis(30_000_000, 0)
    }

    #[test]
    fn test_valid_bundle() {
        let bundle = MegaBundle::new(vec![signed(1337)], 100, 0, head().hash);
        assert_eq!(validate_bundle(&bundle, &head(), 1337, 100), Ok(()));
    }

    #[test]
    fn test_rejections() {
        let head = head();

        let empty = MegaBundle::new(vec![], 100, 0, head.hash);
        assert_eq!(
            validate_bundle(&empty, &head, 1337, 0),
            Err(RejectReason::EmptyBundle)
        );

        let late = MegaBundle::new(vec![signed(1337)], 99, 0, head.hash);
        assert_eq!(
            validate_bundle(&late, &head, 1337, 100),
            Err(RejectReason::DeadlinePassed { deadline: 99, now: 100 })
        );

        let stale = MegaBundle::new(vec![signed(1337)], 100, 0, Hash::new([9; 32]));
        assert!(matches!(
            validate_bundle(&stale, &head, 1337, 0),
            Err(RejectReason::ParentMismatch { .. })
        ));

        let foreign = MegaBundle::new(vec![signed(1337), signed(5)], 100, 0, head.hash);
        assert_eq!(
            validate_bundle(&foreign, &head, 1337, 0),
            Err(RejectReason::WrongChainId {
                index: 1,
                expected: 1337,
                got: 5
            })
        );

        let mut forged = signed(1337);
        forged.value = 1_000_000;
        forged.hash = forged.compute_hash();
        let forged = MegaBundle::new(vec![forged], 100, 0, head.hash);
        assert!(matches!(
            validate_bundle(&forged, &head, 1337, 0),
            Err(RejectReason::MalformedTransaction { index: 0, .. })
        ));
    }
}
