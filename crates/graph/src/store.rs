//! Package store collaborator
//!
//! The store owns downloading and content addressing. The graph builder
//! only asks it to fetch a package, import it into an install directory,
//! and later to cache build side effects.

use async_trait::async_trait;
use nmx_errors::Error;
use nmx_types::{DepPath, Resolution};
use std::path::{Path, PathBuf};

/// What to fetch
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub dep_path: DepPath,
    pub name: String,
    pub version: String,
    pub resolution: Resolution,
}

/// A fetched package, ready to import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// Where the store keeps the package contents
    pub directory: PathBuf,
    /// Opaque handle of the store's file index for this package
    pub files_index: String,
    /// Whether the package contents imply a build step
    pub requires_build: bool,
}

/// How a package was placed into its install directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMethod {
    Clone,
    Hardlink,
    Copy,
}

/// Result of importing a package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOutcome {
    pub method: ImportMethod,
    /// True when cached side effects were imported, so no build is needed
    pub is_built: bool,
}

/// Request to cache the side effects of a build
#[derive(Debug, Clone)]
pub struct SideEffectsUpload {
    pub dep_path: DepPath,
    /// Package id the store indexed the original contents under
    pub pkg_id: String,
    pub cache_key: String,
}

/// Content store the engine imports packages from
#[async_trait]
pub trait PackageStore: Send + Sync {
    /// Make a package available in the store
    ///
    /// # Errors
    ///
    /// Returns an error if the package cannot be obtained.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error>;

    /// Place fetched contents at `target_dir`
    ///
    /// When `side_effects_key` is given and the store holds side effects
    /// for it, those are imported instead and the outcome reports
    /// `is_built`.
    ///
    /// # Errors
    ///
    /// Returns an error if the import fails.
    async fn import_package(
        &self,
        target_dir: &Path,
        fetched: &FetchResponse,
        side_effects_key: Option<&str>,
    ) -> Result<ImportOutcome, Error>;

    /// Record the current state of `dir` as the side effects for a cache key
    ///
    /// # Errors
    ///
    /// Returns an error if the upload fails.
    async fn upload_side_effects(&self, dir: &Path, upload: &SideEffectsUpload)
        -> Result<(), Error>;

    /// Remove unreferenced content from the store
    ///
    /// # Errors
    ///
    /// Returns an error if pruning fails.
    async fn prune(&self) -> Result<(), Error>;
}
