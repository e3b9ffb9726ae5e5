// meridian/core/sequencer/src/assembler.rs

//! Candidate block assembly for a single policy.

use crate::bundle::MegaBundle;
use crate::config::PipelineSettings;
use crate::policy::PipelinePolicy;
use meridian_consensus::types::{Block, Hash, Header, Transaction};
use meridian_consensus::{Engine, EngineError};
use meridian_execution::executor::TX_BASE_GAS;
use meridian_execution::{BlockEnv, BlockExecutor, ExecutionError, ExecutionOutcome, StateDB};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// A sealed block offered by one pipeline
#[derive(Debug, Clone)]
pub struct SealedCandidate {
    pub policy: PipelinePolicy,
    pub block: Block,
    /// Value the coinbase gains from the whole block
    pub coinbase_value: u128,
    /// Bundle the block was built around, if any
    pub bundle: Option<Hash>,
}

/// Result of pruning held bundles against a working head
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneOutcome {
    pub stale: usize,
    pub expired: usize,
}

/// Bundles a pipeline has received and not yet discarded
#[derive(Debug, Default)]
pub struct BundleBook {
    bundles: Vec<Arc<MegaBundle>>,
}

impl BundleBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bundle: Arc<MegaBundle>) {
        self.bundles.push(bundle);
    }

    /// Drop bundles computed against another head and those past deadline
    pub fn prune(&mut self, head: &Hash, now: u64) -> PruneOutcome {
        let mut outcome = PruneOutcome::default();
        self.bundles.retain(|bundle| {
            if bundle.parent_hash != *head {
                debug!(
                    "Discarding bundle {}: built for {}, head is {}",
                    bundle.hash(),
                    bundle.parent_hash,
                    head
                );
                outcome.stale += 1;
                false
            } else if bundle.is_expired(now) {
                debug!(
                    "Discarding bundle {}: deadline {} passed",
                    bundle.hash(),
                    bundle.deadline
                );
                outcome.expired += 1;
                false
            } else {
                true
            }
        });
        outcome
    }

    pub fn bundles(&self) -> &[Arc<MegaBundle>] {
        &self.bundles
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

/// Executed body ready for sealing
pub struct AssembledBody {
    pub outcome: ExecutionOutcome,
    pub bundle: Option<Hash>,
}

/// Builds one candidate on top of `parent`
pub struct CandidateBuilder<'a> {
    pub policy: PipelinePolicy,
    pub settings: &'a PipelineSettings,
    pub parent: &'a Header,
    pub timestamp: u64,
}

impl<'a> CandidateBuilder<'a> {
    pub fn new(
        policy: PipelinePolicy,
        settings: &'a PipelineSettings,
        parent: &'a Header,
        now: u64,
    ) -> Self {
        Self {
            policy,
            settings,
            parent,
            timestamp: now.max(parent.timestamp + 1),
        }
    }

    fn env(&self) -> BlockEnv {
        BlockEnv {
            number: self.parent.number + 1,
            coinbase: self.settings.etherbase,
            gas_limit: self.settings.gas_limit,
        }
    }

    /// Executes the policy's body. `None` means this policy has nothing to
    /// offer on this head.
    pub fn assemble(
        &self,
        state: &StateDB,
        bundles: &[Arc<MegaBundle>],
        pending: &[Transaction],
    ) -> Option<AssembledBody> {
        match self.policy {
            PipelinePolicy::Standard => {
                let mut executor = BlockExecutor::new(state.clone(), self.env());
                fill_pending(&mut executor, pending, &HashSet::new());
                Some(AssembledBody {
                    outcome: executor.finish(),
                    bundle: None,
                })
            }
            PipelinePolicy::BundleAugmented => {
                let (mut executor, bundle) = match self.best_bundle(state, bundles) {
                    Some((executor, bundle)) => (executor, Some(bundle)),
                    None => (BlockExecutor::new(state.clone(), self.env()), None),
                };
                let skip: HashSet<Hash> = bundle
                    .as_ref()
                    .map(|b| b.tx_hashes().into_iter().collect())
                    .unwrap_or_default();
                fill_pending(&mut executor, pending, &skip);
                Some(AssembledBody {
                    outcome: executor.finish(),
                    bundle: bundle.map(|b| b.hash()),
                })
            }
            PipelinePolicy::BundleExclusive => {
                let (executor, bundle) = self.best_bundle(state, bundles)?;
                Some(AssembledBody {
                    outcome: executor.finish(),
                    bundle: Some(bundle.hash()),
                })
            }
        }
    }

    /// Most profitable bundle that executes cleanly and pays its minimum
    fn best_bundle(
        &self,
        state: &StateDB,
        bundles: &[Arc<MegaBundle>],
    ) -> Option<(BlockExecutor, Arc<MegaBundle>)> {
        let mut best: Option<(u128, BlockExecutor, Arc<MegaBundle>)> = None;

        for bundle in bundles {
            let mut executor = BlockExecutor::new(state.clone(), self.env());
            match executor.apply_bundle(&bundle.transactions) {
                Ok(diff) if diff >= bundle.min_coinbase_diff => {
                    if best.as_ref().map_or(true, |(d, _, _)| diff > *d) {
                        best = Some((diff, executor, bundle.clone()));
                    }
                }
                Ok(diff) => debug!(
                    "Bundle {} pays {} below its minimum {}",
                    bundle.hash(),
                    diff,
                    bundle.min_coinbase_diff
                ),
                Err(e) => debug!("Bundle {} does not execute: {}", bundle.hash(), e),
            }
        }

        best.map(|(_, executor, bundle)| (executor, bundle))
    }

    pub fn seal(
        &self,
        body: AssembledBody,
        engine: &dyn Engine,
    ) -> Result<SealedCandidate, EngineError> {
        let header = Header {
            hash: Hash::default(),
            parent_hash: self.parent.hash,
            number: self.parent.number + 1,
            timestamp: self.timestamp,
            coinbase: self.settings.etherbase,
            extra: self.settings.extra.clone(),
            gas_limit: self.settings.gas_limit,
            gas_used: body.outcome.gas_used,
            tx_root: Hash::default(),
        };
        let block = engine.seal(header, body.outcome.transactions)?;
        Ok(SealedCandidate {
            policy: self.policy,
            block,
            coinbase_value: body.outcome.coinbase_value,
            bundle: body.bundle,
        })
    }
}

fn fill_pending(executor: &mut BlockExecutor, pending: &[Transaction], skip: &HashSet<Hash>) {
    for tx in pending {
        if skip.contains(&tx.hash) {
            continue;
        }
        let err = match executor.apply(tx) {
            Ok(_) => continue,
            Err(e) => e,
        };
        // Nothing else can fit
        if matches!(err, ExecutionError::BlockGasExhausted { .. })
            && executor.gas_remaining() < TX_BASE_GAS
        {
            break;
        }
        debug!("Skipping pending transaction {}: {}", tx.hash, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MinerConfig;
    use ed25519_dalek::SigningKey;
    use meridian_consensus::crypto::sign_transaction;
    use meridian_consensus::types::{Address, PublicKey, Signature};
    use meridian_consensus::InstantSeal;
    use meridian_execution::PAYMENT_CONTRACT_CODE;

    const COINBASE: Address = Address([0xcb; 20]);

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn address(seed: u8) -> Address {
        Address::from_public_key(&PublicKey::new(key(seed).verifying_key().to_bytes()))
    }

    fn tx(seed: u8, nonce: u64, to: Option<Address>, value: u128, data: &[u8]) -> Transaction {
        let mut tx = Transaction {
            hash: Hash::default(),
            chain_id: 1337,
            nonce,
            from: PublicKey::default(),
            to,
            value,
            gas_limit: 100_000,
            gas_price: 1,
            data: data.to_vec(),
            signature: Signature::default(),
        };
        sign_transaction(&mut tx, &key(seed));
        tx
    }

    /// State with a deployed payment contract, funded senders 1..=3
    fn setup() -> (StateDB, Address) {
        let mut state = StateDB::with_alloc((1..=3).map(|s| (address(s), 10_000_000u128)));
        let contract = Address::create(&address(9), 0);
        state.register_payment_contract(contract);
        (state, contract)
    }

    fn settings() -> PipelineSettings {
        let mut settings = MinerConfig::default().settings();
        settings.etherbase = COINBASE;
        settings
    }

    fn parent() -> Header {
        Header::genesis(30_000_000, 100)
    }

    fn bundle(txs: Vec<Transaction>, min: u128, deadline: u64) -> Arc<MegaBundle> {
        Arc::new(MegaBundle::new(txs, deadline, min, parent().hash))
    }

    #[test]
    fn test_prune_two_deadlines() {
        let head = parent().hash;
        let t = 1_000;
        let b1 = bundle(vec![tx(1, 0, None, 0, &[])], 0, t + 10);
        let b2 = bundle(vec![tx(2, 0, None, 0, &[])], 0, t + 5);

        let mut book = BundleBook::new();
        book.push(b1.clone());
        book.push(b2);

        assert_eq!(book.prune(&head, t + 5), PruneOutcome::default());
        assert_eq!(book.len(), 2);

        let outcome = book.prune(&head, t + 6);
        assert_eq!(outcome.expired, 1);
        assert_eq!(book.bundles(), &[b1]);
    }

    #[test]
    fn test_prune_stale_parent() {
        let mut book = BundleBook::new();
        book.push(bundle(vec![tx(1, 0, None, 0, &[])], 0, u64::MAX));

        let outcome = book.prune(&Hash::new([7; 32]), 0);
        assert_eq!(outcome.stale, 1);
        assert!(book.is_empty());
    }

    #[test]
    fn test_exclusive_is_exactly_the_bundle() {
        let (state, contract) = setup();
        let settings = settings();
        let parent = parent();
        let bundle_txs = vec![
            tx(1, 0, Some(address(2)), 5, &[]),
            tx(2, 0, Some(contract), 50_000, &[]),
        ];
        let b = bundle(bundle_txs.clone(), 50_000, u64::MAX);
        let pending = vec![tx(3, 0, Some(address(1)), 1, &[])];

        let builder = CandidateBuilder::new(PipelinePolicy::BundleExclusive, &settings, &parent, 0);
        let body = builder.assemble(&state, &[b.clone()], &pending).unwrap();
        let candidate = builder.seal(body, &InstantSeal).unwrap();

        assert_eq!(candidate.block.transactions, bundle_txs);
        assert_eq!(candidate.bundle, Some(b.hash()));
        assert_eq!(candidate.block.header.coinbase, COINBASE);
        assert_eq!(candidate.block.number(), 1);
        assert_eq!(candidate.block.header.timestamp, 101);
    }

    #[test]
    fn test_exclusive_without_admissible_bundle() {
        let (state, contract) = setup();
        let settings = settings();
        let parent = parent();
        // Pays less than it promises
        let cheap = bundle(vec![tx(1, 0, Some(contract), 10, &[])], 1_000_000, u64::MAX);
        // Nonce gap
        let broken = bundle(vec![tx(2, 5, Some(contract), 10, &[])], 0, u64::MAX);

        let builder = CandidateBuilder::new(PipelinePolicy::BundleExclusive, &settings, &parent, 0);
        assert!(builder.assemble(&state, &[cheap, broken], &[]).is_none());
        assert!(builder.assemble(&state, &[], &[]).is_none());
    }

    #[test]
    fn test_augmented_puts_best_bundle_first() {
        let (state, contract) = setup();
        let settings = settings();
        let parent = parent();
        let small = bundle(vec![tx(1, 0, Some(contract), 1_000, &[])], 0, u64::MAX);
        let large_tx = tx(2, 0, Some(contract), 9_000, &[]);
        let large = bundle(vec![large_tx.clone()], 0, u64::MAX);
        let ordinary = tx(3, 0, Some(address(1)), 1, &[]);
        // Also in the bundle; must not appear twice
        let pending = vec![large_tx.clone(), ordinary.clone()];

        let builder = CandidateBuilder::new(PipelinePolicy::BundleAugmented, &settings, &parent, 0);
        let body = builder
            .assemble(&state, &[small, large.clone()], &pending)
            .unwrap();
        let candidate = builder.seal(body, &InstantSeal).unwrap();

        assert_eq!(candidate.block.transactions, vec![large_tx, ordinary]);
        assert_eq!(candidate.bundle, Some(large.hash()));
        assert_eq!(candidate.coinbase_value, 9_000 + 2 * 21_000);
    }

    #[test]
    fn test_etherbase_funding_its_own_bundle() {
        let (state, _) = setup();
        let mut settings = settings();
        settings.etherbase = address(1);
        let parent = parent();
        let transfer = vec![tx(1, 0, Some(address(2)), 5, &[])];

        let builder = CandidateBuilder::new(PipelinePolicy::BundleExclusive, &settings, &parent, 0);
        let demanding = bundle(transfer.clone(), 1, u64::MAX);
        assert!(builder.assemble(&state, &[demanding], &[]).is_none());

        let free = bundle(transfer, 0, u64::MAX);
        let body = builder.assemble(&state, &[free], &[]).unwrap();
        assert_eq!(body.outcome.coinbase_value, 0);
    }

    #[test]
    fn test_standard_stops_when_block_is_full() {
        let (state, _) = setup();
        let mut settings = settings();
        settings.gas_limit = 2 * TX_BASE_GAS + TX_BASE_GAS / 2;
        let parent = parent();
        let pending: Vec<_> = (0..4).map(|n| tx(1, n, Some(address(2)), 1, &[])).collect();

        let builder = CandidateBuilder::new(PipelinePolicy::Standard, &settings, &parent, 0);
        let body = builder.assemble(&state, &[], &pending).unwrap();
        assert_eq!(body.outcome.transactions, pending[..2].to_vec());
        assert_eq!(body.outcome.gas_used, 2 * TX_BASE_GAS);
    }

    #[test]
    fn test_standard_ignores_bundles() {
        let (state, contract) = setup();
        let settings = settings();
        let parent = parent();
        let b = bundle(vec![tx(1, 0, Some(contract), 1_000, &[])], 0, u64::MAX);
        let deploy = tx(2, 0, None, 0, PAYMENT_CONTRACT_CODE);

        let builder = CandidateBuilder::new(PipelinePolicy::Standard, &settings, &parent, 500);
        let body = builder.assemble(&state, &[b], &[deploy.clone()]).unwrap();
        assert!(body.bundle.is_none());

        let candidate = builder.seal(body, &InstantSeal).unwrap();
        assert_eq!(candidate.block.transactions, vec![deploy]);
        assert_eq!(candidate.block.header.timestamp, 500);
        assert_eq!(candidate.block.header.extra, settings.extra);
    }
}
