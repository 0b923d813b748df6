use super::{FailureContext, SkipReason};
use nmx_types::DepPath;
use serde::{Deserialize, Serialize};

/// Build-specific events for the event system
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BuildEvent {
    /// A chunk of mutually independent builds is starting
    ChunkStarted {
        index: usize,
        packages: Vec<DepPath>,
    },

    /// Lifecycle scripts of a package are about to run
    PackageStarted { dep_path: DepPath, stage: String },

    /// A package finished building
    PackageBuilt {
        dep_path: DepPath,
        duration_ms: u64,
    },

    /// A build output was copied to another hoisted location
    OutputLinked { dep_path: DepPath, location: String },

    /// A required build failed
    Failed {
        dep_path: DepPath,
        failure: FailureContext,
    },

    /// An optional dependency failed to build and was skipped
    OptionalSkipped {
        dep_path: DepPath,
        name: String,
        version: String,
        reason: SkipReason,
        failure: FailureContext,
    },

    /// Scripts not run because the build policy does not allow them
    IgnoredBuilds { names: Vec<String> },

    /// Build side effects were uploaded to the store cache
    SideEffectsCached {
        dep_path: DepPath,
        state_key: String,
    },

    /// A patch failed to apply but was not strict
    PatchSkipped {
        dep_path: DepPath,
        failure: FailureContext,
    },
}
