//! Virtual store layout
//!
//! Every dependency path gets one directory in the virtual store:
//! `<vstore>/<filename>/node_modules/<name>`. Children are linked next to
//! the package inside that `node_modules`, so a package can only see what
//! it declares.

use nmx_types::{DepPath, ProjectId};
use std::path::{Path, PathBuf};

/// Length of the hash suffix appended to truncated filenames
const HASH_SUFFIX_LEN: usize = 26;

/// Directory name of the private hoist level inside the virtual store
pub const PRIVATE_HOIST_DIR: &str = "node_modules";

/// File name of the lockfile describing what the virtual store holds
pub const CURRENT_LOCKFILE: &str = "lock.yaml";

/// Convert a dependency path into a filesystem-safe directory name
///
/// Names longer than `max_len`, or containing uppercase characters, are
/// truncated and suffixed with `_` and a 26 character hash of the full
/// name so that distinct paths never collide.
#[must_use]
pub fn dep_path_to_filename(dep_path: &DepPath, max_len: usize) -> String {
    let mut filename = unescaped_filename(dep_path.as_str())
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '+',
            other => other,
        })
        .collect::<String>();

    if filename.contains('(') {
        if filename.ends_with(')') {
            filename.pop();
        }
        filename = filename.replace(")(", "_").replace(['(', ')'], "_");
    }

    let needs_hash = filename.chars().count() > max_len
        || (filename != filename.to_lowercase() && !filename.starts_with("file+"));
    if !needs_hash {
        return filename;
    }

    let keep = max_len.saturating_sub(HASH_SUFFIX_LEN + 1);
    let prefix: String = filename.chars().take(keep).collect();
    let digest = nmx_hash::Hash::from_data(filename.as_bytes()).short_hex(HASH_SUFFIX_LEN);
    format!("{prefix}_{digest}")
}

fn unescaped_filename(dep_path: &str) -> String {
    if let Some(rest) = dep_path.strip_prefix("file:") {
        return format!("file+{rest}");
    }
    dep_path.strip_prefix('/').unwrap_or(dep_path).to_string()
}

/// Paths of one project tree's module layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualStoreLayout {
    lockfile_dir: PathBuf,
    modules_dir_name: String,
    virtual_store_dir: PathBuf,
    max_length: usize,
}

impl VirtualStoreLayout {
    pub fn new(
        lockfile_dir: impl Into<PathBuf>,
        modules_dir_name: impl Into<String>,
        virtual_store_dir: impl Into<PathBuf>,
        max_length: usize,
    ) -> Self {
        Self {
            lockfile_dir: lockfile_dir.into(),
            modules_dir_name: modules_dir_name.into(),
            virtual_store_dir: virtual_store_dir.into(),
            max_length,
        }
    }

    /// Layout derived from configuration
    #[must_use]
    pub fn from_config(config: &nmx_config::Config, lockfile_dir: &Path) -> Self {
        Self::new(
            lockfile_dir,
            config.install.modules_dir.clone(),
            config.virtual_store_dir(lockfile_dir),
            config.install.virtual_store_dir_max_length,
        )
    }

    #[must_use]
    pub fn lockfile_dir(&self) -> &Path {
        &self.lockfile_dir
    }

    #[must_use]
    pub fn virtual_store_dir(&self) -> &Path {
        &self.virtual_store_dir
    }

    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    #[must_use]
    pub fn modules_dir_name(&self) -> &str {
        &self.modules_dir_name
    }

    /// Store directory name for a dependency path
    #[must_use]
    pub fn filename(&self, dep_path: &DepPath) -> String {
        dep_path_to_filename(dep_path, self.max_length)
    }

    /// Top-level virtual store entry of a dependency path
    #[must_use]
    pub fn package_entry_dir(&self, dep_path: &DepPath) -> PathBuf {
        self.virtual_store_dir.join(self.filename(dep_path))
    }

    /// The `node_modules` directory holding a package and its children
    #[must_use]
    pub fn package_modules_dir(&self, dep_path: &DepPath) -> PathBuf {
        self.package_entry_dir(dep_path).join("node_modules")
    }

    /// Lockfile of what is currently installed
    #[must_use]
    pub fn current_lockfile_path(&self) -> PathBuf {
        self.virtual_store_dir.join(CURRENT_LOCKFILE)
    }

    /// Install directory of a package
    #[must_use]
    pub fn package_dir(&self, dep_path: &DepPath, name: &str) -> PathBuf {
        self.package_modules_dir(dep_path).join(name)
    }

    /// Directory of a workspace project
    #[must_use]
    pub fn importer_dir(&self, importer: &ProjectId) -> PathBuf {
        if importer.is_root() {
            self.lockfile_dir.clone()
        } else {
            self.lockfile_dir.join(importer.as_str())
        }
    }

    /// `node_modules` of a workspace project
    #[must_use]
    pub fn importer_modules_dir(&self, importer: &ProjectId) -> PathBuf {
        self.importer_dir(importer).join(&self.modules_dir_name)
    }

    /// Public hoist level: the root project's `node_modules`
    #[must_use]
    pub fn public_hoist_dir(&self) -> PathBuf {
        self.importer_modules_dir(&ProjectId::root())
    }

    /// Private hoist level inside the virtual store
    #[must_use]
    pub fn private_hoist_dir(&self) -> PathBuf {
        self.virtual_store_dir.join(PRIVATE_HOIST_DIR)
    }
}
