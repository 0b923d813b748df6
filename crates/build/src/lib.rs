#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Lifecycle builds for nmx
//!
//! Selects the packages that need install-time scripts or patches, orders
//! them so dependencies build first, and runs them with bounded
//! concurrency. Build side effects are uploaded to the package store under
//! their dependency state key.

mod executor;
mod in_flight;
mod policy;
mod scripts;
mod sequencer;

pub use executor::{BuildExecutor, BuildOptions, BuildOutcome};
pub use in_flight::{BuiltPackage, InFlightBuilds, SharedBuild};
pub use policy::{AllowAll, BuildPolicy, ListedBuildPolicy};
pub use scripts::{
    effective_manifest, script_env, PatchApplier, PatchRequest, ScriptRunner, ShellScriptRunner,
    LIFECYCLE_STAGES,
};
pub use sequencer::{build_sequence, BuildPlan};
