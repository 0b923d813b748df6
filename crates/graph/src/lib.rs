#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Dependency graph construction for nmx
//!
//! Turns a lockfile into the graph of package instances to materialize:
//! install locations in the virtual store, resolved dependency edges,
//! installability decisions and incremental reuse of a previous install.
//! Also computes the dependency state keys that identify a package's
//! build inputs.

mod builder;
mod dep_state;
mod installability;
mod layout;
mod node;
mod runtime;
mod store;

pub use builder::{snapshot_graph, GraphBuilder, GraphBuilderOptions, MaterializeSummary};
pub use dep_state::{calc_dep_state, DepStateCache, DepStateObj, DepStateOptions};
pub use installability::{
    Incompatibility, InstallabilityChecker, InstallabilityRequest, PlatformChecker,
};
pub use layout::{dep_path_to_filename, VirtualStoreLayout, CURRENT_LOCKFILE, PRIVATE_HOIST_DIR};
pub use node::{
    pkg_id_with_patch_hash, DependencyGraph, DirectDependency, ImporterNode, LockfileGraph,
    PackageNode,
};
pub use runtime::RuntimeIdentity;
pub use store::{
    FetchRequest, FetchResponse, ImportMethod, ImportOutcome, PackageStore, SideEffectsUpload,
};
