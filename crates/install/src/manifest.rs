//! Modules manifest
//!
//! `node_modules/.modules.yaml` records the settings the last install ran
//! with. The next install compares them with its own to decide what can
//! be reused and what has to be undone first.

use chrono::{DateTime, Utc};
use nmx_config::HoistConfig;
use nmx_errors::{Error, InstallError};
use nmx_graph::{LockfileGraph, VirtualStoreLayout};
use nmx_hoist::HoistedAliasAssignment;
use nmx_types::{DepPath, IncludedDependencies};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// File name of the manifest inside the root modules directory
pub const MODULES_MANIFEST: &str = ".modules.yaml";

/// Version of the on-disk layout; a different value forces a full reinstall
pub const LAYOUT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModulesManifest {
    pub layout_version: u32,
    pub package_manager: String,
    /// Private hoist patterns; `None` when hoisting was disabled
    #[serde(default)]
    pub hoist_pattern: Option<Vec<String>>,
    #[serde(default)]
    pub public_hoist_pattern: Option<Vec<String>>,
    #[serde(default)]
    pub hoisted_dependencies: HoistedAliasAssignment,
    /// Packages left out of the install: incompatible or failed optional ones
    #[serde(default)]
    pub skipped: BTreeSet<DepPath>,
    pub virtual_store_dir: PathBuf,
    pub virtual_store_dir_max_length: usize,
    /// Install directories per package, relative to the lockfile directory
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hoisted_locations: BTreeMap<DepPath, Vec<PathBuf>>,
    pub included: IncludedDependencies,
    /// Names of packages whose scripts the build policy withheld
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ignored_builds: BTreeSet<String>,
    pub pruned_at: DateTime<Utc>,
}

fn recorded_patterns(enabled: bool, patterns: &[String]) -> Option<Vec<String>> {
    enabled.then(|| patterns.to_vec())
}

impl ModulesManifest {
    /// Manifest for an install with the given settings and nothing recorded yet
    #[must_use]
    pub fn new(
        layout: &VirtualStoreLayout,
        hoist: &HoistConfig,
        included: IncludedDependencies,
    ) -> Self {
        Self {
            layout_version: LAYOUT_VERSION,
            package_manager: format!("nmx@{}", env!("CARGO_PKG_VERSION")),
            hoist_pattern: recorded_patterns(hoist.enabled, &hoist.hoist_pattern),
            public_hoist_pattern: recorded_patterns(hoist.enabled, &hoist.public_hoist_pattern),
            hoisted_dependencies: HoistedAliasAssignment::new(),
            skipped: BTreeSet::new(),
            virtual_store_dir: layout.virtual_store_dir().to_path_buf(),
            virtual_store_dir_max_length: layout.max_length(),
            hoisted_locations: BTreeMap::new(),
            included,
            ignored_builds: BTreeSet::new(),
            pruned_at: Utc::now(),
        }
    }

    /// Whether packages installed under this manifest can be reused with `layout`
    #[must_use]
    pub fn is_compatible(&self, layout: &VirtualStoreLayout) -> bool {
        self.layout_version == LAYOUT_VERSION
            && self.virtual_store_dir == layout.virtual_store_dir()
            && self.virtual_store_dir_max_length == layout.max_length()
    }

    /// Whether `hoist` would hoist differently from the recorded install
    #[must_use]
    pub fn hoist_patterns_changed(&self, hoist: &HoistConfig) -> bool {
        self.hoist_pattern != recorded_patterns(hoist.enabled, &hoist.hoist_pattern)
            || self.public_hoist_pattern
                != recorded_patterns(hoist.enabled, &hoist.public_hoist_pattern)
    }

    /// Record where every package of `graph` is installed
    pub fn record_locations(&mut self, graph: &LockfileGraph, lockfile_dir: &Path) {
        self.hoisted_locations = graph
            .graph
            .iter()
            .map(|(dep_path, node)| {
                let location = node
                    .directory
                    .strip_prefix(lockfile_dir)
                    .map_or_else(|_| node.directory.clone(), Path::to_path_buf);
                (dep_path.clone(), vec![location])
            })
            .collect();
    }

    /// Read the manifest of a modules directory
    ///
    /// Returns `None` when there is none.
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::ManifestCorrupted`] if the file exists but
    /// cannot be read or parsed.
    pub async fn read(modules_dir: &Path) -> Result<Option<Self>, Error> {
        let path = modules_dir.join(MODULES_MANIFEST);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(InstallError::ManifestCorrupted {
                    path: path.display().to_string(),
                    message: e.to_string(),
                }
                .into())
            }
        };
        serde_yml::from_str(&contents)
            .map(Some)
            .map_err(|e| {
                InstallError::ManifestCorrupted {
                    path: path.display().to_string(),
                    message: e.to_string(),
                }
                .into()
            })
    }

    /// Write the manifest into a modules directory
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::WriteFailed`] if serialization or the write fails.
    pub async fn write(&self, modules_dir: &Path) -> Result<(), Error> {
        let path = modules_dir.join(MODULES_MANIFEST);
        let write_failed = |message: String| -> Error {
            InstallError::WriteFailed {
                path: path.display().to_string(),
                message,
            }
            .into()
        };
        let contents = serde_yml::to_string(self).map_err(|e| write_failed(e.to_string()))?;
        tokio::fs::create_dir_all(modules_dir)
            .await
            .map_err(|e| write_failed(e.to_string()))?;
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| write_failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nmx_types::HoistKind;

    fn layout(root: &Path) -> VirtualStoreLayout {
        VirtualStoreLayout::new(root, "node_modules", root.join("node_modules/.nmx"), 120)
    }

    #[tokio::test]
    async fn test_manifest_survives_write_and_read() {
        let temp = tempfile::tempdir().unwrap();
        let layout = layout(temp.path());
        let mut manifest =
            ModulesManifest::new(&layout, &HoistConfig::default(), IncludedDependencies::default());
        manifest.hoisted_dependencies.insert(
            DepPath::new("@types/node@20.0.0"),
            "@types/node".into(),
            HoistKind::Public,
        );
        manifest.skipped.insert(DepPath::new("fsevents@2.3.3"));
        manifest.ignored_builds.insert("esbuild".into());

        let modules_dir = layout.public_hoist_dir();
        manifest.write(&modules_dir).await.unwrap();
        let read = ModulesManifest::read(&modules_dir).await.unwrap().unwrap();
        assert_eq!(read, manifest);

        let raw = tokio::fs::read_to_string(modules_dir.join(MODULES_MANIFEST))
            .await
            .unwrap();
        assert!(raw.contains("hoistedDependencies"));
        assert!(raw.contains("virtualStoreDirMaxLength: 120"));
    }

    #[tokio::test]
    async fn test_missing_manifest_reads_as_none() {
        let temp = tempfile::tempdir().unwrap();
        assert!(ModulesManifest::read(temp.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_manifest_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        tokio::fs::write(temp.path().join(MODULES_MANIFEST), "layoutVersion: [")
            .await
            .unwrap();
        let err = ModulesManifest::read(temp.path()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Install(InstallError::ManifestCorrupted { .. })
        ));
    }

    #[test]
    fn test_compatibility_and_pattern_changes() {
        let root = Path::new("/repo");
        let hoist = HoistConfig::default();
        let manifest = ModulesManifest::new(&layout(root), &hoist, IncludedDependencies::default());

        assert!(manifest.is_compatible(&layout(root)));
        let moved = VirtualStoreLayout::new(root, "node_modules", root.join(".store"), 120);
        assert!(!manifest.is_compatible(&moved));
        let shorter = VirtualStoreLayout::new(root, "node_modules", root.join("node_modules/.nmx"), 60);
        assert!(!manifest.is_compatible(&shorter));

        assert!(!manifest.hoist_patterns_changed(&hoist));
        let public = HoistConfig {
            public_hoist_pattern: vec!["*eslint*".into()],
            ..HoistConfig::default()
        };
        assert!(manifest.hoist_patterns_changed(&public));
        let disabled = HoistConfig {
            enabled: false,
            ..HoistConfig::default()
        };
        assert!(manifest.hoist_patterns_changed(&disabled));
    }
}
