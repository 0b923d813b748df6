use nmx_types::DepPath;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a package was left out of the install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnsupportedEngine,
    UnsupportedPlatform,
    BuildFailure,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::UnsupportedEngine => "unsupported_engine",
            Self::UnsupportedPlatform => "unsupported_platform",
            Self::BuildFailure => "build_failure",
        };
        f.write_str(label)
    }
}

/// Events emitted while turning a lockfile into a dependency graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GraphEvent {
    /// An optional package was excluded
    PackageSkipped {
        dep_path: DepPath,
        name: String,
        version: String,
        reason: SkipReason,
        details: String,
    },

    /// A package was fetched and imported into the virtual store
    PackageAdded { dep_path: DepPath },

    /// An unchanged package was reused from the previous install
    PackageReused { dep_path: DepPath },

    /// The graph is complete
    Built {
        nodes: usize,
        importers: usize,
        skipped: usize,
    },
}
