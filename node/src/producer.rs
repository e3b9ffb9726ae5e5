// meridian/node/src/producer.rs

use crate::config::ProducerConfig;
use crate::logging::formats;
use meridian_consensus::types::{HeadNotification, Hash};
use meridian_sequencer::{Mempool, SealedCandidate};
use meridian_storage::ChainStore;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Pick the most valuable candidate extending `head`.
///
/// Candidates built on any other parent are dropped. Ties keep the earliest
/// candidate received.
pub fn select_best(
    candidates: Vec<SealedCandidate>,
    head: &Hash,
    allow_empty: bool,
) -> Option<SealedCandidate> {
    candidates
        .into_iter()
        .filter(|c| c.block.parent_hash() == *head)
        .filter(|c| allow_empty || !c.block.transactions.is_empty())
        .fold(None, |best: Option<SealedCandidate>, candidate| match best {
            Some(best) if best.coinbase_value >= candidate.coinbase_value => Some(best),
            _ => Some(candidate),
        })
}

/// Imports one pipeline candidate per slot
pub struct BlockProducer {
    chain: Arc<ChainStore>,
    mempool: Arc<Mempool>,
    candidates: mpsc::UnboundedReceiver<SealedCandidate>,
    config: ProducerConfig,
    buffered: Vec<SealedCandidate>,
}

impl BlockProducer {
    pub fn new(
        chain: Arc<ChainStore>,
        mempool: Arc<Mempool>,
        candidates: mpsc::UnboundedReceiver<SealedCandidate>,
        config: ProducerConfig,
    ) -> Self {
        Self {
            chain,
            mempool,
            candidates,
            config,
            buffered: Vec::new(),
        }
    }

    /// Move every queued candidate into the slot buffer
    fn collect(&mut self) -> usize {
        let mut received = 0;
        while let Ok(candidate) = self.candidates.try_recv() {
            self.buffered.push(candidate);
            received += 1;
        }
        received
    }

    /// Close the current slot: import the best buffered candidate, if any
    pub async fn produce(&mut self) -> Option<HeadNotification> {
        self.collect();
        let offered = self.buffered.len();
        let head = self.chain.head();
        let best = select_best(
            std::mem::take(&mut self.buffered),
            &head.hash,
            self.config.allow_empty,
        )?;

        debug!(
            "Slot on {} closed with {} candidates, best from {}",
            head.hash, offered, best.policy
        );

        let tx_hashes = best.block.tx_hashes();
        let line = formats::block_produced(&best.block, best.policy, best.coinbase_value);
        match self.chain.import_block(best.block) {
            Ok(notification) => {
                info!("Produced block {}", line);
                let removed = self
                    .mempool
                    .remove_included(&tx_hashes, &self.chain.latest_state())
                    .await;
                debug!("Removed {} transactions from the mempool", removed);
                Some(notification)
            }
            Err(e) => {
                warn!("Failed to import candidate from {}: {}", best.policy, e);
                None
            }
        }
    }

    /// Run until `shutdown` flips to true or every pipeline is gone
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut slots = interval(self.config.slot());
        slots.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("Block producer running with {:?} slots", self.config.slot());

        loop {
            tokio::select! {
                _ = slots.tick() => {
                    self.produce().await;
                }
                candidate = self.candidates.recv() => match candidate {
                    Some(candidate) => self.buffered.push(candidate),
                    None => {
                        info!("All pipelines closed, block producer exiting");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Block producer shutting down");
                        break;
                    }
                }
            }
        }
    }
}
