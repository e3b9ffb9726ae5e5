// meridian/core/execution/src/payment.rs

//! Proposer payment attribution.
//!
//! External accounting watches for a `FlashbotsPayment(address,address,uint256)`
//! event carrying `{coinbase, payer, amount}`. The development chain emulates
//! the proxy contract that emits it: a contract created with
//! [`PAYMENT_CONTRACT_CODE`] forwards any value it receives to the block
//! coinbase and records the event.

use crate::types::{Log, Receipt};
use meridian_consensus::types::{keccak256, Address, Hash};
use serde::{Deserialize, Serialize};

/// Solidity signature of the payment event
pub const PAYMENT_EVENT_SIGNATURE: &str = "FlashbotsPayment(address,address,uint256)";

/// Creation code recognized as the payment proxy contract
pub const PAYMENT_CONTRACT_CODE: &[u8] = b"meridian/payment-proxy/v1";

/// Topic0 of the payment event
pub fn payment_topic() -> Hash {
    keccak256(PAYMENT_EVENT_SIGNATURE.as_bytes())
}

/// Payment routed to a block proposer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub coinbase: Address,
    pub payer: Address,
    pub amount: u128,
}

impl PaymentEvent {
    /// ABI-style log: three 32-byte words, addresses left-padded, amount big-endian
    pub fn to_log(&self, contract: Address) -> Log {
        let mut data = Vec::with_capacity(96);
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(self.coinbase.as_bytes());
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(self.payer.as_bytes());
        data.extend_from_slice(&[0u8; 16]);
        data.extend_from_slice(&self.amount.to_be_bytes());

        Log {
            address: contract,
            topics: vec![payment_topic()],
            data,
        }
    }

    /// Decode a payment event, ignoring unrelated logs
    pub fn from_log(log: &Log) -> Option<Self> {
        if log.topics.first() != Some(&payment_topic()) || log.data.len() != 96 {
            return None;
        }

        let word = |i: usize| &log.data[i * 32..(i + 1) * 32];
        let address = |w: &[u8]| {
            let mut addr = [0u8; 20];
            addr.copy_from_slice(&w[12..]);
            Address(addr)
        };

        let mut amount = [0u8; 16];
        amount.copy_from_slice(&word(2)[16..]);

        Some(Self {
            coinbase: address(word(0)),
            payer: address(word(1)),
            amount: u128::from_be_bytes(amount),
        })
    }
}

/// All payment events found in a block's receipts
pub fn payments_in(receipts: &[Receipt]) -> Vec<PaymentEvent> {
    receipts
        .iter()
        .flat_map(|r| r.logs.iter())
        .filter_map(PaymentEvent::from_log)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_log_decodes() {
        let event = PaymentEvent {
            coinbase: Address([1; 20]),
            payer: Address([2; 20]),
            amount: 100_000_000_000_000_000,
        };
        let log = event.to_log(Address([3; 20]));
        assert_eq!(log.topics[0], payment_topic());
        assert_eq!(PaymentEvent::from_log(&log), Some(event));
    }

    #[test]
    fn test_unrelated_log_is_ignored() {
        let log = Log {
            address: Address([3; 20]),
            topics: vec![Hash::new([9; 32])],
            data: vec![0; 96],
        };
        assert_eq!(PaymentEvent::from_log(&log), None);
    }
}
