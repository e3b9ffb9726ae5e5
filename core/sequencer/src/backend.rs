// meridian/core/sequencer/src/backend.rs

use crate::mempool::Mempool;
use async_trait::async_trait;
use meridian_consensus::types::{Address, Hash, HeadNotification, Header, Transaction};
use meridian_execution::StateDB;
use meridian_storage::{ChainError, ChainStore};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),
}

/// Chain state, pending transactions and head events a pipeline builds on
#[async_trait]
pub trait ChainBackend: Send + Sync {
    async fn head(&self) -> Header;

    async fn state_at(&self, block: &Hash) -> Result<StateDB, BackendError>;

    /// Executable pending transactions on top of `state`, best first
    async fn pending_transactions(&self, state: &StateDB, limit: usize) -> Vec<Transaction>;

    fn subscribe_heads(&self) -> broadcast::Receiver<HeadNotification>;
}

/// Decides whether a new head was produced by this node
pub type LocalBlockPredicate = Arc<dyn Fn(&HeadNotification) -> bool + Send + Sync>;

/// Heads whose coinbase is `etherbase` count as local
pub fn coinbase_predicate(etherbase: Address) -> LocalBlockPredicate {
    Arc::new(move |head: &HeadNotification| head.coinbase == etherbase)
}

/// Backend over the in-process chain and mempool
pub struct NodeBackend {
    chain: Arc<ChainStore>,
    mempool: Arc<Mempool>,
}

impl NodeBackend {
    pub fn new(chain: Arc<ChainStore>, mempool: Arc<Mempool>) -> Self {
        Self { chain, mempool }
    }
}

#[async_trait]
impl ChainBackend for NodeBackend {
    async fn head(&self) -> Header {
        self.chain.head()
    }

    async fn state_at(&self, block: &Hash) -> Result<StateDB, BackendError> {
        Ok(self.chain.state_at(block)?)
    }

    async fn pending_transactions(&self, state: &StateDB, limit: usize) -> Vec<Transaction> {
        self.mempool.pending(state, limit).await
    }

    fn subscribe_heads(&self) -> broadcast::Receiver<HeadNotification> {
        self.chain.subscribe_heads()
    }
}
