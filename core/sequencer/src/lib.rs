// meridian/core/sequencer/src/lib.rs

// Multi-pipeline block production: bundles, policies, pipelines and the
// coordinator that drives them
pub mod assembler;
pub mod backend;
pub mod bundle;
pub mod config;
pub mod coordinator;
pub mod intake;
pub mod mempool;
pub mod pipeline;
pub mod policy;
pub mod submission;

pub use assembler::{BundleBook, CandidateBuilder, SealedCandidate};
pub use backend::{coinbase_predicate, BackendError, ChainBackend, LocalBlockPredicate, NodeBackend};
pub use bundle::MegaBundle;
pub use config::{ConfigUpdate, MinerConfig, PipelineSettings, MIN_RECOMMIT_INTERVAL};
pub use coordinator::{CoordinatorError, MultiPipeline};
pub use intake::{IntakeQueue, IntakeSubscription};
pub use mempool::{Mempool, MempoolConfig, MempoolError};
pub use pipeline::{Pipeline, PipelineError, PipelineState, StatsSnapshot};
pub use policy::PipelinePolicy;
pub use submission::{unix_now, validate_bundle, BundleReceipt, RejectReason};
