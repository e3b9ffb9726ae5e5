// meridian/core/sequencer/src/coordinator.rs

use crate::assembler::SealedCandidate;
use crate::backend::{ChainBackend, LocalBlockPredicate};
use crate::bundle::MegaBundle;
use crate::config::{ConfigUpdate, MinerConfig, PipelineSettings};
use crate::intake::IntakeQueue;
use crate::pipeline::{Pipeline, PipelineContext, PipelineError, StatsSnapshot};
use crate::policy::PipelinePolicy;
use crate::submission::{unix_now, validate_bundle, BundleReceipt, RejectReason};
use meridian_consensus::types::{Address, ChainConfig};
use meridian_consensus::Engine;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    #[error("Miner is closed")]
    Closed,

    #[error("Bundle rejected: {0}")]
    Rejected(#[from] RejectReason),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{} pipeline(s) failed: {}", .0.len(), describe(.0))]
    FanOut(Vec<(PipelinePolicy, PipelineError)>),
}

fn describe(failures: &[(PipelinePolicy, PipelineError)]) -> String {
    failures
        .iter()
        .map(|(policy, e)| format!("{}: {}", policy, e))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Runs one pipeline per [`PipelinePolicy`] behind a single handle.
///
/// Every lifecycle and configuration call is applied to all pipelines under
/// one lock, so callers never see pipelines with different settings. The
/// bundle-aware pipelines share one [`IntakeQueue`].
pub struct MultiPipeline {
    chain_id: u64,
    backend: Arc<dyn ChainBackend>,
    pipelines: Vec<Pipeline>,
    intake: IntakeQueue,
    closed: AtomicBool,
    fan_out: Mutex<()>,
}

impl MultiPipeline {
    /// Spawns the pipelines stopped. Must be called inside a tokio runtime.
    pub fn new(
        chain: &ChainConfig,
        miner: &MinerConfig,
        engine: Arc<dyn Engine>,
        backend: Arc<dyn ChainBackend>,
        candidates: mpsc::UnboundedSender<SealedCandidate>,
        is_local_block: LocalBlockPredicate,
    ) -> Self {
        let intake = IntakeQueue::new(miner.intake_capacity);
        let ctx = PipelineContext {
            engine,
            backend: backend.clone(),
            candidates,
            is_local_block,
        };
        let settings = miner.settings();

        let pipelines = PipelinePolicy::ALL
            .iter()
            .map(|policy| {
                let subscription = policy
                    .accepts_bundles()
                    .then(|| intake.subscribe(*policy));
                Pipeline::spawn(*policy, settings.clone(), ctx.clone(), subscription)
            })
            .collect();

        info!(
            "Miner created with {} pipelines, {} on the bundle intake",
            PipelinePolicy::ALL.len(),
            intake.subscriber_count()
        );

        Self {
            chain_id: chain.chain_id,
            backend,
            pipelines,
            intake,
            closed: AtomicBool::new(false),
            fan_out: Mutex::new(()),
        }
    }

    fn ensure_open(&self) -> Result<(), CoordinatorError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoordinatorError::Closed);
        }
        Ok(())
    }

    /// Run `op` on every pipeline, collecting failures instead of stopping
    fn each<F>(&self, op: F) -> Result<(), CoordinatorError>
    where
        F: Fn(&Pipeline) -> Result<(), PipelineError>,
    {
        let failures: Vec<_> = self
            .pipelines
            .iter()
            .filter_map(|pipeline| op(pipeline).err().map(|e| (pipeline.policy(), e)))
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            warn!("Fan-out failed on {}", describe(&failures));
            Err(CoordinatorError::FanOut(failures))
        }
    }

    pub fn start(&self) -> Result<(), CoordinatorError> {
        let _guard = self.fan_out.lock();
        self.ensure_open()?;
        info!("Starting miner");
        self.each(Pipeline::start)
    }

    pub fn stop(&self) -> Result<(), CoordinatorError> {
        let _guard = self.fan_out.lock();
        self.ensure_open()?;
        info!("Stopping miner");
        self.each(Pipeline::stop)
    }

    /// Terminal; every later call returns [`CoordinatorError::Closed`]
    pub fn close(&self) -> Result<(), CoordinatorError> {
        let _guard = self.fan_out.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(CoordinatorError::Closed);
        }
        info!("Closing miner");
        self.each(Pipeline::close)
    }

    /// True if any pipeline is running
    pub fn is_running(&self) -> bool {
        self.pipelines.iter().any(Pipeline::is_running)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn update(&self, update: ConfigUpdate) -> Result<(), CoordinatorError> {
        update.validate().map_err(CoordinatorError::InvalidConfig)?;
        let _guard = self.fan_out.lock();
        self.ensure_open()?;
        debug!("Applying {:?} to all pipelines", update);
        self.each(|pipeline| pipeline.apply(&update))
    }

    pub fn set_extra(&self, extra: Vec<u8>) -> Result<(), CoordinatorError> {
        self.update(ConfigUpdate::Extra(extra))
    }

    pub fn set_recommit_interval(&self, interval: Duration) -> Result<(), CoordinatorError> {
        self.update(ConfigUpdate::Recommit(interval))
    }

    pub fn set_etherbase(&self, etherbase: Address) -> Result<(), CoordinatorError> {
        self.update(ConfigUpdate::Etherbase(etherbase))
    }

    pub fn enable_preseal(&self) -> Result<(), CoordinatorError> {
        self.update(ConfigUpdate::Preseal(true))
    }

    pub fn disable_preseal(&self) -> Result<(), CoordinatorError> {
        self.update(ConfigUpdate::Preseal(false))
    }

    /// Validate a bundle against the current head and publish it to every
    /// bundle-aware pipeline. Acceptance says nothing about inclusion.
    pub async fn submit_bundle(&self, bundle: MegaBundle) -> Result<BundleReceipt, CoordinatorError> {
        self.ensure_open()?;

        let head = self.backend.head().await;
        if let Err(reason) = validate_bundle(&bundle, &head, self.chain_id, unix_now()) {
            debug!("Rejected bundle {}: {}", bundle.hash(), reason);
            return Err(reason.into());
        }

        let bundle_hash = bundle.hash();
        // close() may have run while the head was loading
        let subscribers = {
            let _guard = self.fan_out.lock();
            self.ensure_open()?;
            self.intake.publish(Arc::new(bundle))
        };
        info!(
            "Accepted bundle {} on parent {} for {} pipelines",
            bundle_hash, head.hash, subscribers
        );

        Ok(BundleReceipt {
            bundle_hash,
            subscribers,
        })
    }

    pub fn policies(&self) -> Vec<PipelinePolicy> {
        self.pipelines.iter().map(Pipeline::policy).collect()
    }

    pub fn pipeline_settings(&self) -> Vec<(PipelinePolicy, PipelineSettings)> {
        let _guard = self.fan_out.lock();
        self.pipelines
            .iter()
            .map(|p| (p.policy(), p.settings()))
            .collect()
    }

    /// Whether each pipeline's worker task is still running
    pub fn workers_alive(&self) -> Vec<(PipelinePolicy, bool)> {
        self.pipelines
            .iter()
            .map(|p| (p.policy(), p.worker_alive()))
            .collect()
    }

    pub fn stats(&self) -> Vec<(PipelinePolicy, StatsSnapshot)> {
        self.pipelines
            .iter()
            .map(|p| (p.policy(), p.stats()))
            .collect()
    }
}
