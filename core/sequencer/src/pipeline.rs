// meridian/core/sequencer/src/pipeline.rs

//! A single block-building pipeline.
//!
//! The [`Pipeline`] handle is synchronous: lifecycle and configuration
//! changes are published on `watch` channels and picked up by the worker
//! task, which waits on head notifications, the recommit timer, the intake
//! and those control channels in one `select!`.

use crate::assembler::{BundleBook, CandidateBuilder, SealedCandidate};
use crate::backend::{ChainBackend, LocalBlockPredicate};
use crate::bundle::MegaBundle;
use crate::config::{ConfigUpdate, PipelineSettings};
use crate::intake::IntakeSubscription;
use crate::policy::PipelinePolicy;
use crate::submission::unix_now;
use meridian_consensus::types::{HeadNotification, Header};
use meridian_consensus::Engine;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Pending transactions considered per candidate
const MAX_PENDING_PER_BLOCK: usize = 4096;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Pipeline is closed")]
    Closed,

    #[error("Pipeline worker has exited")]
    WorkerGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Stopped,
    Running,
    Closed,
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    bundles_received: AtomicU64,
    bundles_skipped: AtomicU64,
    bundles_stale: AtomicU64,
    bundles_expired: AtomicU64,
    candidates_sealed: AtomicU64,
    assembly_failures: AtomicU64,
    local_blocks: AtomicU64,
}

/// Point-in-time copy of a pipeline's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub bundles_received: u64,
    pub bundles_skipped: u64,
    pub bundles_stale: u64,
    pub bundles_expired: u64,
    pub candidates_sealed: u64,
    pub assembly_failures: u64,
    pub local_blocks: u64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bundles_received: self.bundles_received.load(Ordering::Relaxed),
            bundles_skipped: self.bundles_skipped.load(Ordering::Relaxed),
            bundles_stale: self.bundles_stale.load(Ordering::Relaxed),
            bundles_expired: self.bundles_expired.load(Ordering::Relaxed),
            candidates_sealed: self.candidates_sealed.load(Ordering::Relaxed),
            assembly_failures: self.assembly_failures.load(Ordering::Relaxed),
            local_blocks: self.local_blocks.load(Ordering::Relaxed),
        }
    }
}

/// Collaborators shared by every pipeline of a coordinator
#[derive(Clone)]
pub struct PipelineContext {
    pub engine: Arc<dyn Engine>,
    pub backend: Arc<dyn ChainBackend>,
    pub candidates: mpsc::UnboundedSender<SealedCandidate>,
    pub is_local_block: LocalBlockPredicate,
}

/// Handle to a running pipeline task
pub struct Pipeline {
    policy: PipelinePolicy,
    state_tx: watch::Sender<PipelineState>,
    settings_tx: watch::Sender<PipelineSettings>,
    stats: Arc<PipelineStats>,
    worker: JoinHandle<()>,
}

impl Pipeline {
    /// Spawn the worker in the stopped state. Must run inside a tokio runtime.
    pub fn spawn(
        policy: PipelinePolicy,
        settings: PipelineSettings,
        ctx: PipelineContext,
        intake: Option<IntakeSubscription>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(PipelineState::Stopped);
        let (settings_tx, settings_rx) = watch::channel(settings);
        let stats = Arc::new(PipelineStats::default());

        let worker = Worker {
            policy,
            heads: ctx.backend.subscribe_heads(),
            ctx,
            intake,
            state_rx,
            settings_rx,
            stats: stats.clone(),
            book: BundleBook::new(),
            head_seen: false,
        };
        let worker = tokio::spawn(worker.run());

        Self {
            policy,
            state_tx,
            settings_tx,
            stats,
            worker,
        }
    }

    pub fn policy(&self) -> PipelinePolicy {
        self.policy
    }

    pub fn state(&self) -> PipelineState {
        *self.state_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    pub fn start(&self) -> Result<(), PipelineError> {
        self.transition(PipelineState::Running)
    }

    pub fn stop(&self) -> Result<(), PipelineError> {
        self.transition(PipelineState::Stopped)
    }

    /// Terminal. A second close reports `Closed`.
    pub fn close(&self) -> Result<(), PipelineError> {
        self.transition(PipelineState::Closed)
    }

    fn transition(&self, to: PipelineState) -> Result<(), PipelineError> {
        let mut was_closed = false;
        self.state_tx.send_if_modified(|state| {
            if *state == PipelineState::Closed {
                was_closed = true;
                return false;
            }
            if *state == to {
                return false;
            }
            *state = to;
            true
        });

        if was_closed {
            return Err(PipelineError::Closed);
        }
        if to != PipelineState::Closed && self.worker.is_finished() {
            return Err(PipelineError::WorkerGone);
        }
        Ok(())
    }

    /// Apply a configuration change. The stored settings are updated even
    /// when the worker is gone so the observable configuration never
    /// diverges from siblings.
    pub fn apply(&self, update: &ConfigUpdate) -> Result<(), PipelineError> {
        if self.state() == PipelineState::Closed {
            return Err(PipelineError::Closed);
        }
        self.settings_tx.send_if_modified(|settings| update.apply(settings));
        if self.worker.is_finished() {
            return Err(PipelineError::WorkerGone);
        }
        Ok(())
    }

    pub fn settings(&self) -> PipelineSettings {
        self.settings_tx.borrow().clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn worker_alive(&self) -> bool {
        !self.worker.is_finished()
    }
}

struct Worker {
    policy: PipelinePolicy,
    ctx: PipelineContext,
    heads: broadcast::Receiver<HeadNotification>,
    intake: Option<IntakeSubscription>,
    state_rx: watch::Receiver<PipelineState>,
    settings_rx: watch::Receiver<PipelineSettings>,
    stats: Arc<PipelineStats>,
    book: BundleBook,
    /// A head notification arrived since the last start
    head_seen: bool,
}

fn recommit_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_bundle(intake: &mut Option<IntakeSubscription>) -> Option<Arc<MegaBundle>> {
    match intake {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

impl Worker {
    async fn run(mut self) {
        let mut recommit_period = self.settings_rx.borrow().recommit;
        let mut recommit = recommit_timer(recommit_period);
        debug!("Pipeline {} spawned", self.policy);

        loop {
            let running = *self.state_rx.borrow() == PipelineState::Running;

            tokio::select! {
                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        debug!("Pipeline {} handle dropped", self.policy);
                        break;
                    }
                    let state = *self.state_rx.borrow_and_update();
                    match state {
                        PipelineState::Closed => break,
                        PipelineState::Running => {
                            info!("Pipeline {} started", self.policy);
                            self.head_seen = false;
                            recommit = recommit_timer(recommit_period);
                            self.commit("start").await;
                        }
                        PipelineState::Stopped => info!("Pipeline {} stopped", self.policy),
                    }
                }

                changed = self.settings_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let period = self.settings_rx.borrow_and_update().recommit;
                    if period != recommit_period {
                        debug!("Pipeline {} recommit interval now {:?}", self.policy, period);
                        recommit_period = period;
                        recommit = recommit_timer(period);
                    }
                }

                head = self.heads.recv() => match head {
                    Ok(head) => self.on_head(head, running).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Pipeline {} missed {} head notifications", self.policy, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Pipeline {} lost its head feed", self.policy);
                        break;
                    }
                },

                bundle = next_bundle(&mut self.intake) => match bundle {
                    Some(bundle) => self.on_bundle(bundle, running).await,
                    None => {
                        debug!("Pipeline {} intake closed", self.policy);
                        self.intake = None;
                    }
                },

                _ = recommit.tick(), if running => self.commit("recommit").await,
            }
        }

        info!("Pipeline {} closed", self.policy);
    }

    async fn on_head(&mut self, head: HeadNotification, running: bool) {
        self.head_seen = true;
        if (self.ctx.is_local_block)(&head) {
            PipelineStats::bump(&self.stats.local_blocks, 1);
            info!(
                "Pipeline {} saw local block {} at height {}",
                self.policy, head.hash, head.number
            );
        }
        if running {
            self.commit("new head").await;
        } else if !self.book.is_empty() {
            self.prune_book().await;
        }
    }

    async fn on_bundle(&mut self, bundle: Arc<MegaBundle>, running: bool) {
        PipelineStats::bump(&self.stats.bundles_received, 1);
        if let Some(intake) = &self.intake {
            self.stats
                .bundles_skipped
                .store(intake.skipped(), Ordering::Relaxed);
        }
        debug!(
            "Pipeline {} received bundle {} with {} transactions",
            self.policy,
            bundle.hash(),
            bundle.transactions.len()
        );
        self.book.push(bundle);
        if running {
            self.commit("bundle").await;
        } else {
            self.prune_book().await;
        }
    }

    /// Drop held bundles that no longer apply to the backend's head
    async fn prune_book(&mut self) -> Header {
        let head = self.ctx.backend.head().await;
        let pruned = self.book.prune(&head.hash, unix_now());
        PipelineStats::bump(&self.stats.bundles_stale, pruned.stale as u64);
        PipelineStats::bump(&self.stats.bundles_expired, pruned.expired as u64);
        head
    }

    /// Assemble, seal and hand off a candidate on the backend's current head
    async fn commit(&mut self, reason: &str) {
        let parent = self.prune_book().await;
        let now = unix_now();

        let settings = self.settings_rx.borrow().clone();
        if !settings.preseal && !self.head_seen {
            debug!(
                "Pipeline {} waiting for a head before assembling",
                self.policy
            );
            return;
        }

        if self.policy == PipelinePolicy::BundleExclusive && self.book.is_empty() {
            return;
        }

        let state = match self.ctx.backend.state_at(&parent.hash).await {
            Ok(state) => state,
            Err(e) => {
                warn!("Pipeline {} cannot load state: {}", self.policy, e);
                PipelineStats::bump(&self.stats.assembly_failures, 1);
                return;
            }
        };

        let pending = if self.policy == PipelinePolicy::BundleExclusive {
            Vec::new()
        } else {
            self.ctx
                .backend
                .pending_transactions(&state, MAX_PENDING_PER_BLOCK)
                .await
        };

        let builder = CandidateBuilder::new(self.policy, &settings, &parent, now);
        let Some(body) = builder.assemble(&state, self.book.bundles(), &pending) else {
            debug!(
                "Pipeline {} has no admissible bundle on {}",
                self.policy, parent.hash
            );
            return;
        };

        match builder.seal(body, self.ctx.engine.as_ref()) {
            Ok(candidate) => {
                PipelineStats::bump(&self.stats.candidates_sealed, 1);
                debug!(
                    "Pipeline {} sealed candidate {} ({}) with {} transactions, coinbase +{}",
                    self.policy,
                    candidate.block.hash(),
                    reason,
                    candidate.block.transactions.len(),
                    candidate.coinbase_value
                );
                if self.ctx.candidates.send(candidate).is_err() {
                    warn!("Pipeline {} candidate sink is gone", self.policy);
                }
            }
            Err(e) => {
                warn!("Pipeline {} failed to seal: {}", self.policy, e);
                PipelineStats::bump(&self.stats.assembly_failures, 1);
            }
        }
    }
}
