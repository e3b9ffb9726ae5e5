// meridian/core/sequencer/src/policy.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a pipeline treats submitted bundles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePolicy {
    /// Pending transactions only; never reads the intake
    Standard,
    /// Best bundle first, then pending transactions that still fit
    BundleAugmented,
    /// Exactly one bundle's transactions and nothing else
    BundleExclusive,
}

impl PipelinePolicy {
    /// One pipeline is created for each of these, in this order
    pub const ALL: [PipelinePolicy; 3] = [
        PipelinePolicy::Standard,
        PipelinePolicy::BundleAugmented,
        PipelinePolicy::BundleExclusive,
    ];

    pub fn accepts_bundles(&self) -> bool {
        !matches!(self, PipelinePolicy::Standard)
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelinePolicy::Standard => "standard",
            PipelinePolicy::BundleAugmented => "bundle-augmented",
            PipelinePolicy::BundleExclusive => "bundle-exclusive",
        }
    }
}

impl fmt::Display for PipelinePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
