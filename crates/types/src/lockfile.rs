//! Lockfile data model
//!
//! The lockfile is a YAML document keyed in camelCase. It lists every
//! importer (workspace project) with its direct dependency references and
//! every resolved package snapshot keyed by dependency path.

use crate::{DepPath, DependenciesField, IncludedDependencies};
use nmx_errors::{Error, InstallError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Lockfile format version written by this engine
pub const LOCKFILE_VERSION: &str = "9.0";

/// Identifier of a workspace project relative to the lockfile directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Id of the workspace root project
    pub const ROOT: &'static str = ".";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Complete lockfile document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lockfile {
    pub lockfile_version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub patched_dependencies: BTreeMap<String, PatchFile>,
    #[serde(default)]
    pub importers: BTreeMap<ProjectId, ProjectSnapshot>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub packages: BTreeMap<DepPath, PackageSnapshot>,
}

impl Default for Lockfile {
    fn default() -> Self {
        Self {
            lockfile_version: LOCKFILE_VERSION.to_string(),
            patched_dependencies: BTreeMap::new(),
            importers: BTreeMap::new(),
            packages: BTreeMap::new(),
        }
    }
}

impl Lockfile {
    /// Parse a lockfile from YAML
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a valid lockfile.
    pub fn from_yaml_str(input: &str) -> Result<Self> {
        serde_yml::from_str(input).map_err(Error::from)
    }

    /// Serialize the lockfile to YAML
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yml::to_string(self).map_err(Error::from)
    }

    /// Read a lockfile from disk
    ///
    /// A missing file loads as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io_with_path(&e, path)),
        };
        let lockfile = serde_yml::from_str(&contents).map_err(|e| {
            InstallError::LockfileUnreadable {
                path: path.display().to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(Some(lockfile))
    }

    /// Write the lockfile to disk, creating parent directories
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let contents = self.to_yaml_string()?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io_with_path(&e, parent))?;
        }
        tokio::fs::write(path, contents)
            .await
            .map_err(|e| InstallError::WriteFailed {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    /// Look up the patch registered for a package
    ///
    /// An exact `name@version` entry wins over a name-only entry.
    #[must_use]
    pub fn patch_for(&self, name: &str, version: &str) -> Option<&PatchFile> {
        self.patched_dependencies
            .get(&format!("{name}@{version}"))
            .or_else(|| self.patched_dependencies.get(name))
    }
}

/// A patch file entry from `patchedDependencies`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchFile {
    /// Path relative to the lockfile directory
    pub path: String,
    pub hash: String,
    #[serde(default = "default_true")]
    pub strict: bool,
}

/// Direct dependencies of one importer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSnapshot {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub specifiers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dev_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,
}

impl ProjectSnapshot {
    #[must_use]
    pub fn field(&self, field: DependenciesField) -> &BTreeMap<String, String> {
        match field {
            DependenciesField::Dependencies => &self.dependencies,
            DependenciesField::DevDependencies => &self.dev_dependencies,
            DependenciesField::OptionalDependencies => &self.optional_dependencies,
        }
    }

    /// Direct dependencies admitted by the inclusion policy, keyed by alias
    ///
    /// When an alias appears in several groups the later group in
    /// [`DependenciesField::ALL`] wins.
    #[must_use]
    pub fn direct_dependencies(
        &self,
        include: &IncludedDependencies,
    ) -> BTreeMap<String, (String, DependenciesField)> {
        let mut out = BTreeMap::new();
        for field in DependenciesField::ALL {
            if !include.includes(field) {
                continue;
            }
            for (alias, reference) in self.field(field) {
                out.insert(alias.clone(), (reference.clone(), field));
            }
        }
        out
    }
}

/// Resolution of a package's contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl Resolution {
    /// Whether the package is a local directory that is linked, not fetched
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.kind.as_deref() == Some("directory") || self.directory.is_some()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Platform constraints declared by a package
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRequirements {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub os: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cpu: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub libc: Vec<String>,
}

/// One resolved package entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageSnapshot {
    #[serde(default, skip_serializing_if = "Resolution::is_empty")]
    pub resolution: Resolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub optional_dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub requires_build: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub has_bin: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub engines: BTreeMap<String, String>,
    #[serde(flatten)]
    pub platform: PlatformRequirements,
    #[serde(default, skip_serializing_if = "is_false")]
    pub patched: bool,
}

impl PackageSnapshot {
    /// Iterate all children as `(alias, reference, optional)`
    pub fn children(&self) -> impl Iterator<Item = (&str, &str, bool)> {
        self.dependencies
            .iter()
            .map(|(alias, reference)| (alias.as_str(), reference.as_str(), false))
            .chain(
                self.optional_dependencies
                    .iter()
                    .map(|(alias, reference)| (alias.as_str(), reference.as_str(), true)),
            )
    }

    /// Whether both snapshots declare the same children
    #[must_use]
    pub fn same_children(&self, other: &Self) -> bool {
        self.dependencies == other.dependencies
            && self.optional_dependencies == other.optional_dependencies
    }

    /// Package name and version, falling back to the dependency path
    #[must_use]
    pub fn name_and_version(&self, dep_path: &DepPath) -> Option<(String, String)> {
        let parsed = dep_path.name_and_version();
        let name = self
            .name
            .clone()
            .or_else(|| parsed.map(|(name, _)| name.to_string()))?;
        let version = self
            .version
            .clone()
            .or_else(|| parsed.map(|(_, version)| version.to_string()))?;
        Some((name, version))
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

fn default_true() -> bool {
    true
}
