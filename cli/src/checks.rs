// meridian/cli/src/checks.rs
//
// End-to-end bundle check: deploy the payment contract, submit a bundle
// paying the coinbase through it, and watch new heads for inclusion.

use crate::client::ChainClient;
use crate::heads::HeadStream;
use anyhow::{bail, Context, Result};
use ed25519_dalek::SigningKey;
use meridian_api::MegaBundleRequest;
use meridian_consensus::crypto::sign_transaction;
use meridian_consensus::types::{
    Address, Hash, HeadNotification, PublicKey, Signature, Transaction,
};
use meridian_execution::PAYMENT_CONTRACT_CODE;
use meridian_sequencer::{unix_now, MegaBundle};
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

const DEPLOY_GAS: u64 = 400_000;
const PAYMENT_GAS: u64 = 100_000;

/// Which block a bundle names as its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AnchorMode {
    /// The latest head; the bundle targets the next block
    Head,
    /// The parent of the latest head
    Parent,
}

#[derive(Debug, Clone)]
pub struct CheckConfig {
    pub anchor: AnchorMode,
    /// Minimum coinbase payment, also the value paid through the contract
    pub coinbase_diff: u128,
    /// Bundle deadline, relative to submission
    pub deadline: Duration,
    /// How long past the deadline to keep watching heads
    pub observation: Duration,
    pub max_attempts: usize,
    pub gas_price: u64,
    pub deploy_timeout: Duration,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            anchor: AnchorMode::Head,
            coinbase_diff: 100_000_000_000_000_000,
            deadline: Duration::from_secs(45),
            observation: Duration::from_secs(15),
            max_attempts: 3,
            gas_price: 1,
            deploy_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Confirmed {
        block: u64,
        tx: Hash,
        /// Paid to the block's coinbase by this sender
        paid: u128,
        attempts: usize,
    },
    Lost {
        attempts: usize,
    },
}

enum Watch {
    Included(HeadNotification, Hash),
    /// Head moved without the bundle; it can no longer apply
    Superseded(HeadNotification),
    Expired,
}

pub struct MevCheck<'a, C, H> {
    client: &'a C,
    heads: &'a mut H,
    key: SigningKey,
    sender: Address,
    config: CheckConfig,
}

impl<'a, C: ChainClient, H: HeadStream> MevCheck<'a, C, H> {
    pub fn new(client: &'a C, heads: &'a mut H, key: SigningKey, config: CheckConfig) -> Self {
        let sender = Address::from_public_key(&PublicKey::new(key.verifying_key().to_bytes()));
        Self {
            client,
            heads,
            key,
            sender,
            config,
        }
    }

    pub fn sender(&self) -> Address {
        self.sender
    }

    fn sign(
        &self,
        chain_id: u64,
        nonce: u64,
        to: Option<Address>,
        value: u128,
        gas_limit: u64,
        data: &[u8],
    ) -> Transaction {
        let mut tx = Transaction {
            hash: Hash::default(),
            chain_id,
            nonce,
            from: PublicKey::default(),
            to,
            value,
            gas_limit,
            gas_price: self.config.gas_price,
            data: data.to_vec(),
            signature: Signature::default(),
        };
        sign_transaction(&mut tx, &self.key);
        tx
    }

    pub async fn run(mut self) -> Result<Outcome> {
        let chain_id = self.client.chain_id().await?;
        if self.client.balance(&self.sender).await? == 0 {
            bail!("{} needs a non-zero balance", self.sender);
        }

        let (contract, mut head) = self.deploy(chain_id).await?;

        for attempt in 1..=self.config.max_attempts {
            let txs = self.submit(chain_id, contract, &head).await?;

            match self.watch(&txs).await? {
                Watch::Included(block, tx) => {
                    let paid = self
                        .client
                        .payments(block.number)
                        .await?
                        .iter()
                        .filter(|p| p.payer == self.sender && p.coinbase == block.coinbase)
                        .map(|p| p.amount)
                        .sum();
                    info!("Bundle transaction {} confirmed in block {}", tx, block.number);
                    return Ok(Outcome::Confirmed {
                        block: block.number,
                        tx,
                        paid,
                        attempts: attempt,
                    });
                }
                Watch::Superseded(new_head) => {
                    warn!(
                        "Block {} did not include attempt {}, resubmitting",
                        new_head.number, attempt
                    );
                    head = new_head;
                }
                Watch::Expired => {
                    warn!("Attempt {} expired without a new head", attempt);
                    head = self.client.latest_head().await?;
                }
            }
        }

        Ok(Outcome::Lost {
            attempts: self.config.max_attempts,
        })
    }

    /// Send the contract creation and wait for the head that includes it
    async fn deploy(&mut self, chain_id: u64) -> Result<(Address, HeadNotification)> {
        let nonce = self.client.nonce(&self.sender).await?;
        let tx = self.sign(chain_id, nonce, None, 0, DEPLOY_GAS, PAYMENT_CONTRACT_CODE);
        let tx_hash = self.client.send_transaction(&tx).await?;
        let contract = Address::create(&self.sender, nonce);
        info!("Deploying payment contract {} in {}", contract, tx_hash);

        let until = Instant::now() + self.config.deploy_timeout;
        loop {
            let head = timeout_at(until, self.heads.next_head())
                .await
                .context("Timed out waiting for the deployment")??
                .context("Head stream ended")?;
            if self.included(head.number, &[tx_hash]).await?.is_some() {
                info!("Payment contract deployed at block {}", head.number);
                return Ok((contract, head));
            }
        }
    }

    async fn submit(
        &self,
        chain_id: u64,
        contract: Address,
        head: &HeadNotification,
    ) -> Result<Vec<Hash>> {
        let nonce = self.client.nonce(&self.sender).await?;
        let payment = self.sign(
            chain_id,
            nonce,
            Some(contract),
            self.config.coinbase_diff,
            PAYMENT_GAS,
            &[],
        );

        let parent = match self.config.anchor {
            AnchorMode::Head => head.hash,
            AnchorMode::Parent => head.parent_hash,
        };
        let bundle = MegaBundle::new(
            vec![payment],
            unix_now() + self.config.deadline.as_secs(),
            self.config.coinbase_diff,
            parent,
        );

        let bundle_hash = self
            .client
            .send_mega_bundle(&MegaBundleRequest::from_bundle(&bundle))
            .await?;
        info!(
            "Submitted bundle {} on parent {} (head {})",
            bundle_hash, parent, head.number
        );
        Ok(bundle.tx_hashes())
    }

    async fn watch(&mut self, txs: &[Hash]) -> Result<Watch> {
        let until = Instant::now() + self.config.deadline + self.config.observation;
        match timeout_at(until, self.heads.next_head()).await {
            Err(_) => Ok(Watch::Expired),
            Ok(head) => {
                let head = head?.context("Head stream ended")?;
                debug!("New head {} {}", head.number, head.hash);
                Ok(match self.included(head.number, txs).await? {
                    Some(tx) => Watch::Included(head, tx),
                    None => Watch::Superseded(head),
                })
            }
        }
    }

    /// First of `txs` found in block `number`
    async fn included(&self, number: u64, txs: &[Hash]) -> Result<Option<Hash>> {
        let block = self.client.block_transactions(number).await?.unwrap_or_default();
        Ok(block.into_iter().find(|tx| txs.contains(tx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Payment;
    use async_trait::async_trait;
    use meridian_api::types::request::decode_transaction;
    use meridian_consensus::types::keccak256;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    const COINBASE: Address = Address([0xcb; 20]);

    /// Produces one block per transaction or accepted bundle
    #[derive(Default)]
    struct MockState {
        height: u64,
        blocks: HashMap<u64, Vec<Transaction>>,
        queued: VecDeque<HeadNotification>,
        bundles: Vec<MegaBundleRequest>,
        include_bundles: bool,
        nonce: u64,
    }

    impl MockState {
        fn head(&self, number: u64) -> HeadNotification {
            HeadNotification {
                number,
                hash: keccak256(&number.to_be_bytes()),
                parent_hash: keccak256(&number.saturating_sub(1).to_be_bytes()),
                timestamp: number,
                coinbase: COINBASE,
            }
        }

        fn produce(&mut self, txs: Vec<Transaction>) {
            self.height += 1;
            self.nonce += txs.len() as u64;
            self.blocks.insert(self.height, txs);
            let head = self.head(self.height);
            self.queued.push_back(head);
        }
    }

    #[derive(Clone, Default)]
    struct MockChain(Arc<Mutex<MockState>>);

    #[async_trait]
    impl ChainClient for MockChain {
        async fn chain_id(&self) -> Result<u64> {
            Ok(1337)
        }

        async fn nonce(&self, _address: &Address) -> Result<u64> {
            Ok(self.0.lock().unwrap().nonce)
        }

        async fn balance(&self, _address: &Address) -> Result<u128> {
            Ok(u128::MAX)
        }

        async fn latest_head(&self) -> Result<HeadNotification> {
            let state = self.0.lock().unwrap();
            Ok(state.head(state.height))
        }

        async fn send_transaction(&self, tx: &Transaction) -> Result<Hash> {
            self.0.lock().unwrap().produce(vec![tx.clone()]);
            Ok(tx.hash)
        }

        async fn send_mega_bundle(&self, bundle: &MegaBundleRequest) -> Result<Hash> {
            let mut state = self.0.lock().unwrap();
            state.bundles.push(bundle.clone());
            let txs = bundle
                .transaction_list
                .iter()
                .map(|raw| decode_transaction(raw).unwrap())
                .collect::<Vec<_>>();
            let hash = MegaBundle::new(txs.clone(), bundle.timestamp, 0, Hash::default()).hash();
            if state.include_bundles {
                state.produce(txs);
            }
            Ok(hash)
        }

        async fn block_transactions(&self, number: u64) -> Result<Option<Vec<Hash>>> {
            let state = self.0.lock().unwrap();
            Ok(state
                .blocks
                .get(&number)
                .map(|txs| txs.iter().map(|tx| tx.hash).collect()))
        }

        async fn payments(&self, number: u64) -> Result<Vec<Payment>> {
            let state = self.0.lock().unwrap();
            Ok(state
                .blocks
                .get(&number)
                .into_iter()
                .flatten()
                .filter(|tx| tx.to.is_some())
                .map(|tx| Payment {
                    coinbase: COINBASE,
                    payer: tx.sender(),
                    amount: tx.value,
                })
                .collect())
        }
    }

    #[async_trait]
    impl HeadStream for MockChain {
        async fn next_head(&mut self) -> Result<Option<HeadNotification>> {
            let next = self.0.lock().unwrap().queued.pop_front();
            match next {
                Some(head) => Ok(Some(head)),
                None => std::future::pending().await,
            }
        }
    }

    fn key() -> SigningKey {
        SigningKey::from_bytes(&[9; 32])
    }

    fn quick() -> CheckConfig {
        CheckConfig {
            deadline: Duration::ZERO,
            observation: Duration::from_millis(50),
            max_attempts: 2,
            deploy_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bundle_confirmed_on_first_attempt() {
        let chain = MockChain::default();
        chain.0.lock().unwrap().include_bundles = true;
        let mut heads = chain.clone();

        let outcome = MevCheck::new(&chain, &mut heads, key(), CheckConfig::default())
            .run()
            .await
            .unwrap();

        match outcome {
            Outcome::Confirmed {
                block,
                paid,
                attempts,
                ..
            } => {
                assert_eq!(block, 2);
                assert_eq!(paid, CheckConfig::default().coinbase_diff);
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // Anchored on the deployment block
        let state = chain.0.lock().unwrap();
        assert_eq!(state.bundles.len(), 1);
        assert_eq!(
            state.bundles[0].parent_hash,
            format!("0x{}", state.head(1).hash.to_hex())
        );
    }

    #[tokio::test]
    async fn test_bundle_lost_after_all_attempts() {
        let chain = MockChain::default();
        let mut heads = chain.clone();

        let outcome = MevCheck::new(&chain, &mut heads, key(), quick())
            .run()
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Lost { attempts: 2 });
        assert_eq!(chain.0.lock().unwrap().bundles.len(), 2);
    }

    #[tokio::test]
    async fn test_parent_anchor() {
        let chain = MockChain::default();
        let mut heads = chain.clone();
        let config = CheckConfig {
            anchor: AnchorMode::Parent,
            max_attempts: 1,
            ..quick()
        };

        MevCheck::new(&chain, &mut heads, key(), config)
            .run()
            .await
            .unwrap();

        let state = chain.0.lock().unwrap();
        assert_eq!(
            state.bundles[0].parent_hash,
            format!("0x{}", state.head(1).parent_hash.to_hex())
        );
    }

    #[tokio::test]
    async fn test_deploy_timeout() {
        let chain = MockChain::default();
        let mut heads = MockChain::default();

        let result = MevCheck::new(&chain, &mut heads, key(), quick()).run().await;
        assert!(result.is_err());
    }
}
