#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Core type definitions for the nmx installation engine
//!
//! This crate provides the lockfile model and the identifiers shared by
//! every stage of an install: dependency paths, importer ids, the
//! dependency inclusion policy, installed package manifests, patch
//! descriptors and reports.

pub mod dep_path;
pub mod include;
pub mod lockfile;
pub mod package_json;
pub mod patch;
pub mod reports;

pub use dep_path::DepPath;
pub use include::{DependenciesField, IncludedDependencies};
pub use lockfile::{
    Lockfile, PackageSnapshot, PatchFile, PlatformRequirements, ProjectId, ProjectSnapshot,
    Resolution,
};
pub use package_json::{BinField, PackageManifest, PACKAGE_JSON};
pub use patch::PatchInfo;
pub use reports::InstallReport;

use serde::{Deserialize, Serialize};

/// Visibility tier of a hoisted alias
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HoistKind {
    /// Linked into the root importer's modules directory
    Public,
    /// Linked into the virtual store's shared modules directory
    Private,
}

impl std::fmt::Display for HoistKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
        }
    }
}
