// meridian/core/sequencer/src/intake.rs

//! Bundle intake shared by the bundle-aware pipelines.
//!
//! Every subscription sees every published bundle once, in publication
//! order. Publishing never waits on a subscriber: one that falls more than
//! `capacity` bundles behind skips the oldest ones.

use crate::bundle::MegaBundle;
use crate::policy::PipelinePolicy;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

pub struct IntakeQueue {
    tx: broadcast::Sender<Arc<MegaBundle>>,
}

impl IntakeQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self, policy: PipelinePolicy) -> IntakeSubscription {
        IntakeSubscription {
            policy,
            rx: self.tx.subscribe(),
            skipped: 0,
        }
    }

    /// Publish to every live subscription; returns how many there were
    pub fn publish(&self, bundle: Arc<MegaBundle>) -> usize {
        match self.tx.send(bundle) {
            Ok(n) => n,
            Err(_) => {
                debug!("Bundle published with no live subscriptions");
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One pipeline's view of the intake
pub struct IntakeSubscription {
    policy: PipelinePolicy,
    rx: broadcast::Receiver<Arc<MegaBundle>>,
    skipped: u64,
}

impl IntakeSubscription {
    /// Next bundle, or `None` once the intake is gone
    pub async fn recv(&mut self) -> Option<Arc<MegaBundle>> {
        loop {
            match self.rx.recv().await {
                Ok(bundle) => return Some(bundle),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.skipped += n;
                    warn!(
                        pipeline = %self.policy,
                        lagged = n,
                        "Intake subscription lagged, oldest bundles dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Bundles lost to lag so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
