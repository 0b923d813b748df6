//! Report type definitions for operations

use crate::DepPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Installation report
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InstallReport {
    /// Packages fetched or imported during this run
    pub added: usize,
    /// Orphaned packages removed from the virtual store
    pub removed: usize,
    /// Names of packages whose scripts were not run because of the build policy
    pub ignored_builds: BTreeSet<String>,
    /// Packages skipped as installability-incompatible optional dependencies
    pub skipped: BTreeSet<DepPath>,
    /// Packages whose lifecycle build ran
    pub built: BTreeSet<DepPath>,
    /// Optional packages whose build failed and were skipped
    pub failed_optional: BTreeSet<DepPath>,
    /// Total execution time
    pub duration_ms: u64,
}
