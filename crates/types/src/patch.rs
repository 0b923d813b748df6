//! Patch descriptors attached to graph nodes

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A patch to apply to a package directory after it is imported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchInfo {
    /// Absolute path of the patch file
    pub path: PathBuf,
    /// Content hash of the patch file
    pub hash: String,
    /// Whether a failed application aborts the install
    pub strict: bool,
}
