use nmx_types::DepPath;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Events emitted while removing stale installation state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PruneEvent {
    /// Orphaned packages were identified
    OrphansFound { dep_paths: Vec<DepPath> },

    /// A path was removed
    PathRemoved { path: PathBuf },

    /// Best-effort removal failed and was skipped
    RemovalFailed { path: PathBuf, message: String },

    /// Pruning finished
    Completed {
        removed_packages: usize,
        removed_links: usize,
    },
}
