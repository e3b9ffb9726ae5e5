// meridian/core/execution/src/executor.rs

use crate::payment::{PaymentEvent, PAYMENT_CONTRACT_CODE};
use crate::state::StateDB;
use crate::types::{BlockEnv, ExecutionError, Receipt};
use meridian_consensus::types::{Address, Transaction};
use tracing::debug;

pub const TX_BASE_GAS: u64 = 21_000;
pub const TX_CREATE_GAS: u64 = 32_000;
pub const TX_DATA_GAS_PER_BYTE: u64 = 16;

/// Gas charged for a transaction before any execution
pub fn intrinsic_gas(tx: &Transaction) -> u64 {
    let mut gas = TX_BASE_GAS + TX_DATA_GAS_PER_BYTE * tx.data.len() as u64;
    if tx.is_contract_creation() {
        gas += TX_CREATE_GAS;
    }
    gas
}

/// Apply one transaction. State is only touched once every check has passed.
pub fn apply_transaction(
    state: &mut StateDB,
    env: &BlockEnv,
    tx: &Transaction,
) -> Result<Receipt, ExecutionError> {
    let sender = tx.sender();
    let account = state.account(&sender);

    if account.nonce != tx.nonce {
        return Err(ExecutionError::InvalidNonce {
            expected: account.nonce,
            got: tx.nonce,
        });
    }

    let gas_used = intrinsic_gas(tx);
    if tx.gas_limit < gas_used {
        return Err(ExecutionError::IntrinsicGas {
            limit: tx.gas_limit,
            required: gas_used,
        });
    }

    let fee = (gas_used as u128)
        .checked_mul(tx.gas_price as u128)
        .ok_or(ExecutionError::Overflow)?;
    let need = fee.checked_add(tx.value).ok_or(ExecutionError::Overflow)?;
    if account.balance < need {
        return Err(ExecutionError::InsufficientBalance {
            need,
            have: account.balance,
        });
    }

    state.debit(sender, need);
    state.increment_nonce(sender);
    state.credit(env.coinbase, fee);

    let mut logs = Vec::new();
    let mut contract_address = None;

    match tx.to {
        None => {
            let created = Address::create(&sender, tx.nonce);
            if tx.data == PAYMENT_CONTRACT_CODE {
                state.register_payment_contract(created);
                debug!("Registered payment contract {}", created);
            }
            state.credit(created, tx.value);
            contract_address = Some(created);
        }
        Some(to) if state.is_payment_contract(&to) => {
            // The proxy forwards everything it receives to the proposer
            state.credit(env.coinbase, tx.value);
            let event = PaymentEvent {
                coinbase: env.coinbase,
                payer: sender,
                amount: tx.value,
            };
            logs.push(event.to_log(to));
        }
        Some(to) => {
            state.credit(to, tx.value);
        }
    }

    Ok(Receipt {
        tx_hash: tx.hash,
        from: sender,
        to: tx.to,
        contract_address,
        gas_used,
        logs,
    })
}

/// Executed block body
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub state: StateDB,
    pub transactions: Vec<Transaction>,
    pub receipts: Vec<Receipt>,
    pub gas_used: u64,
    /// Value accrued to the coinbase over the whole body
    pub coinbase_value: u128,
}

/// Incrementally executes a block body on top of a parent state
pub struct BlockExecutor {
    state: StateDB,
    env: BlockEnv,
    gas_used: u64,
    transactions: Vec<Transaction>,
    receipts: Vec<Receipt>,
    initial_coinbase_balance: u128,
}

impl BlockExecutor {
    pub fn new(state: StateDB, env: BlockEnv) -> Self {
        let initial_coinbase_balance = state.balance(&env.coinbase);
        Self {
            state,
            env,
            gas_used: 0,
            transactions: Vec::new(),
            receipts: Vec::new(),
            initial_coinbase_balance,
        }
    }

    /// Apply a single transaction, leaving the executor untouched on failure
    pub fn apply(&mut self, tx: &Transaction) -> Result<&Receipt, ExecutionError> {
        let needed = intrinsic_gas(tx);
        if self.gas_used + needed > self.env.gas_limit {
            return Err(ExecutionError::BlockGasExhausted {
                used: self.gas_used,
                needed,
                limit: self.env.gas_limit,
            });
        }

        let receipt = apply_transaction(&mut self.state, &self.env, tx)?;
        self.gas_used += receipt.gas_used;
        self.transactions.push(tx.clone());
        self.receipts.push(receipt);
        Ok(&self.receipts[self.receipts.len() - 1])
    }

    /// Apply `txs` atomically; returns the value they paid the coinbase.
    ///
    /// If any transaction fails the executor is restored to where it was.
    pub fn apply_bundle(&mut self, txs: &[Transaction]) -> Result<u128, ExecutionError> {
        let snapshot = self.state.clone();
        let gas_used = self.gas_used;
        let len = self.transactions.len();
        let before = self.state.balance(&self.env.coinbase);

        for tx in txs {
            if let Err(e) = self.apply(tx) {
                self.state = snapshot;
                self.gas_used = gas_used;
                self.transactions.truncate(len);
                self.receipts.truncate(len);
                return Err(e);
            }
        }

        // A coinbase that sends more than it earns gains nothing
        Ok(self.state.balance(&self.env.coinbase).saturating_sub(before))
    }

    pub fn gas_used(&self) -> u64 {
        self.gas_used
    }

    pub fn gas_remaining(&self) -> u64 {
        self.env.gas_limit - self.gas_used
    }

    pub fn state(&self) -> &StateDB {
        &self.state
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn finish(self) -> ExecutionOutcome {
        let coinbase_value = self
            .state
            .balance(&self.env.coinbase)
            .saturating_sub(self.initial_coinbase_balance);
        ExecutionOutcome {
            state: self.state,
            transactions: self.transactions,
            receipts: self.receipts,
            gas_used: self.gas_used,
            coinbase_value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::payments_in;
    use ed25519_dalek::SigningKey;
    use meridian_consensus::crypto::sign_transaction;
    use meridian_consensus::types::{Hash, PublicKey, Signature};
    use proptest::prelude::*;

    const COINBASE: Address = Address([0xcb; 20]);

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn address_of(key: &SigningKey) -> Address {
        Address::from_public_key(&PublicKey::new(key.verifying_key().to_bytes()))
    }

    fn tx(key: &SigningKey, nonce: u64, to: Option<Address>, value: u128, data: &[u8]) -> Transaction {
        let mut tx = Transaction {
            hash: Hash::default(),
            chain_id: 1337,
            nonce,
            from: PublicKey::default(),
            to,
            value,
            gas_limit: 100_000,
            gas_price: 10,
            data: data.to_vec(),
            signature: Signature::default(),
        };
        sign_transaction(&mut tx, key);
        tx
    }

    fn env() -> BlockEnv {
        BlockEnv {
            number: 1,
            coinbase: COINBASE,
            gas_limit: 1_000_000,
        }
    }

    #[test]
    fn test_transfer_pays_fee_to_coinbase() {
        let alice = key(1);
        let bob = Address([2; 20]);
        let mut state = StateDB::with_alloc([(address_of(&alice), 1_000_000)]);

        let receipt = apply_transaction(&mut state, &env(), &tx(&alice, 0, Some(bob), 500, &[])).unwrap();

        assert_eq!(receipt.gas_used, TX_BASE_GAS);
        assert_eq!(state.balance(&bob), 500);
        assert_eq!(state.balance(&COINBASE), 210_000);
        assert_eq!(state.balance(&address_of(&alice)), 1_000_000 - 500 - 210_000);
        assert_eq!(state.nonce(&address_of(&alice)), 1);
    }

    #[test]
    fn test_rejects_bad_nonce_without_touching_state() {
        let alice = key(1);
        let mut state = StateDB::with_alloc([(address_of(&alice), 1_000_000)]);
        let before = state.clone();

        let err = apply_transaction(&mut state, &env(), &tx(&alice, 3, None, 0, &[])).unwrap_err();
        assert_eq!(err, ExecutionError::InvalidNonce { expected: 0, got: 3 });
        assert_eq!(state, before);
    }

    #[test]
    fn test_payment_contract_forwards_value() {
        let alice = key(1);
        let sender = address_of(&alice);
        let mut state = StateDB::with_alloc([(sender, 10_000_000)]);

        let deploy = tx(&alice, 0, None, 0, PAYMENT_CONTRACT_CODE);
        let receipt = apply_transaction(&mut state, &env(), &deploy).unwrap();
        let contract = receipt.contract_address.unwrap();
        assert_eq!(contract, Address::create(&sender, 0));
        assert!(state.is_payment_contract(&contract));

        let coinbase_before = state.balance(&COINBASE);
        let pay = tx(&alice, 1, Some(contract), 1_000, &[]);
        let receipt = apply_transaction(&mut state, &env(), &pay).unwrap();

        assert_eq!(state.balance(&contract), 0);
        assert_eq!(state.balance(&COINBASE) - coinbase_before, 1_000 + 210_000);

        let payments = payments_in(&[receipt]);
        assert_eq!(
            payments,
            vec![PaymentEvent {
                coinbase: COINBASE,
                payer: sender,
                amount: 1_000
            }]
        );
    }

    #[test]
    fn test_bundle_is_all_or_nothing() {
        let alice = key(1);
        let mut executor =
            BlockExecutor::new(StateDB::with_alloc([(address_of(&alice), 1_000_000)]), env());

        let good = tx(&alice, 0, Some(Address([2; 20])), 1, &[]);
        let bad = tx(&alice, 5, Some(Address([2; 20])), 1, &[]);

        assert!(executor.apply_bundle(&[good.clone(), bad]).is_err());
        assert_eq!(executor.gas_used(), 0);
        assert!(executor.transactions().is_empty());

        let paid = executor.apply_bundle(&[good]).unwrap();
        assert_eq!(paid, 210_000);
        assert_eq!(executor.finish().coinbase_value, 210_000);
    }

    #[test]
    fn test_block_gas_limit_enforced() {
        let alice = key(1);
        let mut executor = BlockExecutor::new(
            StateDB::with_alloc([(address_of(&alice), 1_000_000)]),
            BlockEnv {
                gas_limit: 30_000,
                ..env()
            },
        );

        assert!(executor.apply(&tx(&alice, 0, Some(Address([2; 20])), 1, &[])).is_ok());
        assert!(matches!(
            executor.apply(&tx(&alice, 1, Some(Address([2; 20])), 1, &[])),
            Err(ExecutionError::BlockGasExhausted { .. })
        ));
    }

    #[test]
    fn test_coinbase_spending_more_than_it_earns_counts_as_zero() {
        let miner = key(9);
        let etherbase = address_of(&miner);
        let mut executor = BlockExecutor::new(
            StateDB::with_alloc([(etherbase, 1_000_000)]),
            BlockEnv {
                coinbase: etherbase,
                ..env()
            },
        );

        let paid = executor
            .apply_bundle(&[tx(&miner, 0, Some(Address([2; 20])), 5, &[])])
            .unwrap();
        assert_eq!(paid, 0);

        let outcome = executor.finish();
        assert_eq!(outcome.coinbase_value, 0);
        assert_eq!(outcome.state.balance(&etherbase), 1_000_000 - 5);
    }

    proptest! {
        #[test]
        fn prop_transfers_conserve_supply(values in proptest::collection::vec(0u128..10_000, 1..8)) {
            let alice = key(7);
            let mut state = StateDB::with_alloc([(address_of(&alice), 100_000_000)]);
            let supply = state.total_supply();

            for (nonce, value) in values.iter().enumerate() {
                let t = tx(&alice, nonce as u64, Some(Address([nonce as u8; 20])), *value, &[]);
                apply_transaction(&mut state, &env(), &t).unwrap();
            }

            prop_assert_eq!(state.total_supply(), supply);
        }
    }
}
