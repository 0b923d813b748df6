//! Graph node and graph container types
//!
//! Nodes live in an arena keyed by dependency path; edges are dependency
//! paths too, so cycles need no special ownership handling. Every walk
//! carries its own visited set.

use nmx_types::{DepPath, PatchInfo, ProjectId, Resolution};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// One resolved package instance at one install location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageNode {
    pub dep_path: DepPath,
    pub name: String,
    pub version: String,
    /// Package identity including the patch hash, used by dependency state keys
    pub pkg_id_with_patch_hash: String,
    pub resolution: Resolution,
    /// Absolute install directory
    pub directory: PathBuf,
    /// The `node_modules` directory the package and its children live in
    pub modules_dir: PathBuf,
    /// Visible dependency names mapped to graph nodes
    pub children: BTreeMap<String, DepPath>,
    /// Visible dependency names mapped to directories outside the graph
    pub external_children: BTreeMap<String, PathBuf>,
    pub optional_dependency_aliases: BTreeSet<String>,
    pub optional: bool,
    pub requires_build: bool,
    pub has_bin: bool,
    pub patch: Option<PatchInfo>,
    pub is_built: bool,
}

impl PackageNode {
    #[must_use]
    pub fn has_patch(&self) -> bool {
        self.patch.is_some()
    }

    /// Whether the node itself has work to do in the build phase
    #[must_use]
    pub fn needs_own_build(&self) -> bool {
        self.requires_build || self.has_patch()
    }
}

/// Package identity used as the dependency state key
#[must_use]
pub fn pkg_id_with_patch_hash(dep_path: &DepPath, patch: Option<&PatchInfo>) -> String {
    match patch {
        Some(patch) => format!("{}(patch_hash={})", dep_path.without_peers(), patch.hash),
        None => dep_path.without_peers().to_string(),
    }
}

/// Arena of package nodes keyed by dependency path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: BTreeMap<DepPath, PackageNode>,
}

impl DependencyGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: PackageNode) {
        self.nodes.insert(node.dep_path.clone(), node);
    }

    pub fn remove(&mut self, dep_path: &DepPath) -> Option<PackageNode> {
        self.nodes.remove(dep_path)
    }

    #[must_use]
    pub fn get(&self, dep_path: &DepPath) -> Option<&PackageNode> {
        self.nodes.get(dep_path)
    }

    pub fn get_mut(&mut self, dep_path: &DepPath) -> Option<&mut PackageNode> {
        self.nodes.get_mut(dep_path)
    }

    #[must_use]
    pub fn contains(&self, dep_path: &DepPath) -> bool {
        self.nodes.contains_key(dep_path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DepPath, &PackageNode)> {
        self.nodes.iter()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &PackageNode> {
        self.nodes.values()
    }

    pub fn dep_paths(&self) -> impl Iterator<Item = &DepPath> {
        self.nodes.keys()
    }

    /// Every node reachable from `roots`, the roots included
    ///
    /// Roots absent from the graph are ignored.
    pub fn reachable_from<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a DepPath>,
    ) -> BTreeSet<DepPath> {
        let mut visited = BTreeSet::new();
        let mut stack: Vec<&DepPath> = roots.into_iter().collect();
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            if !visited.insert(current.clone()) {
                continue;
            }
            stack.extend(node.children.values());
        }
        visited
    }

    /// Drop every node not in `keep`, along with edges pointing at dropped nodes
    pub fn retain(&mut self, keep: &BTreeSet<DepPath>) {
        self.nodes.retain(|dep_path, _| keep.contains(dep_path));
        for node in self.nodes.values_mut() {
            node.children.retain(|_, child| keep.contains(child));
        }
    }
}

/// Where a direct dependency of an importer points
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum DirectDependency {
    /// A package in the graph
    Package(DepPath),
    /// A directory outside the virtual store (`link:` / `file:`)
    External(PathBuf),
}

impl DirectDependency {
    #[must_use]
    pub fn dep_path(&self) -> Option<&DepPath> {
        match self {
            Self::Package(dep_path) => Some(dep_path),
            Self::External(_) => None,
        }
    }
}

/// A workspace project and its directly visible dependencies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImporterNode {
    pub id: ProjectId,
    pub dir: PathBuf,
    pub modules_dir: PathBuf,
    pub direct: BTreeMap<String, DirectDependency>,
}

/// The graph of one lockfile plus its importers' entry points
#[derive(Debug, Clone, Default)]
pub struct LockfileGraph {
    pub graph: DependencyGraph,
    pub importers: BTreeMap<ProjectId, ImporterNode>,
    /// Packages left out as installability-incompatible or failed optional dependencies
    pub skipped: BTreeSet<DepPath>,
    /// Every package key of the lockfile, installed or not
    pub lockfile_packages: BTreeSet<DepPath>,
}

impl LockfileGraph {
    /// Dependency paths directly required by the given importers
    pub fn direct_dep_paths<'a>(
        &'a self,
        importers: impl IntoIterator<Item = &'a ProjectId> + 'a,
    ) -> impl Iterator<Item = &'a DepPath> + 'a {
        importers
            .into_iter()
            .filter_map(|id| self.importers.get(id))
            .flat_map(|importer| importer.direct.values())
            .filter_map(DirectDependency::dep_path)
    }

    /// Everything reachable from the given importers
    #[must_use]
    pub fn reachable_from_importers(&self, importers: &[ProjectId]) -> BTreeSet<DepPath> {
        self.graph
            .reachable_from(self.direct_dep_paths(importers.iter()))
    }

    /// Everything reachable from any importer
    #[must_use]
    pub fn reachable(&self) -> BTreeSet<DepPath> {
        self.graph.reachable_from(self.direct_dep_paths(self.importers.keys()))
    }

    /// Aliases of a non-root importer that resolve exactly like the root importer's
    ///
    /// Node.js finds these through the root `node_modules`, so the importer
    /// needs no link of its own when direct dependencies are deduplicated.
    #[must_use]
    pub fn deduped_direct_aliases(&self, importer: &ProjectId) -> BTreeSet<String> {
        if importer.is_root() {
            return BTreeSet::new();
        }
        let (Some(own), Some(root)) = (
            self.importers.get(importer),
            self.importers.get(&ProjectId::root()),
        ) else {
            return BTreeSet::new();
        };
        own.direct
            .iter()
            .filter(|(alias, target)| root.direct.get(alias.as_str()) == Some(*target))
            .map(|(alias, _)| alias.clone())
            .collect()
    }
}
