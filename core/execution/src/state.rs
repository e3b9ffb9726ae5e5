// meridian/core/execution/src/state.rs

// Account state for the development chain
use meridian_consensus::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: u128,
    pub nonce: u64,
}

/// Account balances, nonces and registered payment contracts.
///
/// Cheap enough to clone per block so every pipeline can assemble on its own
/// copy of the parent state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDB {
    accounts: HashMap<Address, Account>,
    payment_contracts: HashSet<Address>,
}

impl StateDB {
    pub fn new() -> Self {
        Self::default()
    }

    /// State seeded with genesis balances
    pub fn with_alloc(alloc: impl IntoIterator<Item = (Address, u128)>) -> Self {
        let mut state = Self::new();
        for (address, balance) in alloc {
            state.set_balance(address, balance);
        }
        state
    }

    pub fn account(&self, address: &Address) -> Account {
        self.accounts.get(address).copied().unwrap_or_default()
    }

    pub fn balance(&self, address: &Address) -> u128 {
        self.account(address).balance
    }

    pub fn nonce(&self, address: &Address) -> u64 {
        self.account(address).nonce
    }

    pub fn set_balance(&mut self, address: Address, balance: u128) {
        self.accounts.entry(address).or_default().balance = balance;
    }

    pub fn credit(&mut self, address: Address, amount: u128) {
        let account = self.accounts.entry(address).or_default();
        account.balance = account.balance.saturating_add(amount);
    }

    /// Debit `amount`; the caller checks the balance first
    pub(crate) fn debit(&mut self, address: Address, amount: u128) {
        let account = self.accounts.entry(address).or_default();
        account.balance -= amount;
    }

    pub(crate) fn increment_nonce(&mut self, address: Address) {
        self.accounts.entry(address).or_default().nonce += 1;
    }

    pub fn register_payment_contract(&mut self, address: Address) {
        self.payment_contracts.insert(address);
    }

    pub fn is_payment_contract(&self, address: &Address) -> bool {
        self.payment_contracts.contains(address)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Sum of all balances
    pub fn total_supply(&self) -> u128 {
        self.accounts.values().map(|a| a.balance).sum()
    }
}
