//! Alias assignment
//!
//! Decides which transitive dependencies become visible in the shared
//! hoist directories. The walk order is fixed so that the same graph and
//! patterns always produce the same assignment: shallower packages win,
//! ties go to the lexicographically smaller dependency path.

use crate::matcher::HoistMatchers;
use nmx_graph::{DirectDependency, LockfileGraph};
use nmx_types::{DepPath, HoistKind, ProjectId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Hoisted aliases per package: dep path to alias to visibility
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HoistedAliasAssignment(BTreeMap<DepPath, BTreeMap<String, HoistKind>>);

impl HoistedAliasAssignment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, dep_path: DepPath, alias: String, kind: HoistKind) {
        self.0.entry(dep_path).or_default().insert(alias, kind);
    }

    #[must_use]
    pub fn get(&self, dep_path: &DepPath) -> Option<&BTreeMap<String, HoistKind>> {
        self.0.get(dep_path)
    }

    #[must_use]
    pub fn contains(&self, dep_path: &DepPath) -> bool {
        self.0.contains_key(dep_path)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of hoisted aliases across all packages
    #[must_use]
    pub fn alias_count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    /// Iterate `(dep_path, alias, kind)` triples in order
    pub fn entries(&self) -> impl Iterator<Item = (&DepPath, &str, HoistKind)> {
        self.0.iter().flat_map(|(dep_path, aliases)| {
            aliases
                .iter()
                .map(move |(alias, kind)| (dep_path, alias.as_str(), *kind))
        })
    }

    /// All aliases hoisted with the given visibility
    #[must_use]
    pub fn aliases(&self, kind: HoistKind) -> BTreeSet<String> {
        self.entries()
            .filter(|(_, _, k)| *k == kind)
            .map(|(_, alias, _)| alias.to_string())
            .collect()
    }

    pub fn remove(&mut self, dep_path: &DepPath) -> Option<BTreeMap<String, HoistKind>> {
        self.0.remove(dep_path)
    }

    #[must_use]
    pub fn into_inner(self) -> BTreeMap<DepPath, BTreeMap<String, HoistKind>> {
        self.0
    }
}

impl From<BTreeMap<DepPath, BTreeMap<String, HoistKind>>> for HoistedAliasAssignment {
    fn from(map: BTreeMap<DepPath, BTreeMap<String, HoistKind>>) -> Self {
        Self(map)
    }
}

/// A hoisted alias whose package ships executables
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct HoistedBin {
    pub kind: HoistKind,
    pub alias: String,
    pub dep_path: DepPath,
}

/// Output of [`hoist_graph`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HoistResult {
    pub assignment: HoistedAliasAssignment,
    pub bins: Vec<HoistedBin>,
}

struct Entry<'a> {
    dep_path: Option<&'a DepPath>,
    depth: i64,
    children: Vec<(&'a str, &'a DepPath)>,
}

/// Compute the hoisted alias assignment of a graph
///
/// The root entry (all importers' direct dependencies) is visited first,
/// then every package reachable from it in breadth-first depth order.
/// Aliases of the root importer's direct dependencies are never hoisted
/// over, and the first package to claim an alias (case-insensitively)
/// keeps it.
#[must_use]
pub fn hoist_graph(graph: &LockfileGraph, matchers: &HoistMatchers) -> HoistResult {
    let mut result = HoistResult::default();
    if matchers.is_disabled() {
        return result;
    }

    let mut taken: BTreeSet<String> = graph
        .importers
        .get(&ProjectId::root())
        .map(|root| root.direct.keys().map(|alias| alias.to_lowercase()).collect())
        .unwrap_or_default();

    for entry in ordered_entries(graph) {
        for (alias, child) in entry.children {
            let Some(kind) = matchers.classify(alias) else {
                continue;
            };
            if !taken.insert(alias.to_lowercase()) {
                continue;
            }
            tracing::trace!(
                alias,
                %child,
                from = entry.dep_path.map_or(".", DepPath::as_str),
                "hoisting alias"
            );
            if graph.graph.get(child).is_some_and(|node| node.has_bin) {
                result.bins.push(HoistedBin {
                    kind,
                    alias: alias.to_string(),
                    dep_path: child.clone(),
                });
            }
            result
                .assignment
                .insert(child.clone(), alias.to_string(), kind);
        }
    }
    result.bins.sort();
    result
}

fn ordered_entries(graph: &LockfileGraph) -> Vec<Entry<'_>> {
    let mut root_children = BTreeMap::new();
    for importer in graph.importers.values() {
        for (alias, target) in &importer.direct {
            if let DirectDependency::Package(dep_path) = target {
                if graph.graph.contains(dep_path) {
                    root_children.entry(alias.as_str()).or_insert(dep_path);
                }
            }
        }
    }

    let mut visited: BTreeSet<&DepPath> = BTreeSet::new();
    let mut queue: VecDeque<(&DepPath, i64)> = VecDeque::new();
    for &dep_path in root_children.values() {
        if visited.insert(dep_path) {
            queue.push_back((dep_path, 0));
        }
    }

    let mut entries = vec![Entry {
        dep_path: None,
        depth: -1,
        children: root_children.into_iter().collect(),
    }];

    while let Some((dep_path, depth)) = queue.pop_front() {
        let Some(node) = graph.graph.get(dep_path) else {
            continue;
        };
        let children: Vec<(&str, &DepPath)> = node
            .children
            .iter()
            .filter(|(_, child)| graph.graph.contains(child))
            .map(|(alias, child)| (alias.as_str(), child))
            .collect();
        for &(_, child) in &children {
            if visited.insert(child) {
                queue.push_back((child, depth + 1));
            }
        }
        entries.push(Entry {
            dep_path: Some(dep_path),
            depth,
            children,
        });
    }

    entries.sort_by(|a, b| {
        a.depth
            .cmp(&b.depth)
            .then_with(|| a.dep_path.cmp(&b.dep_path))
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use nmx_graph::{DependencyGraph, ImporterNode, PackageNode};
    use std::path::PathBuf;

    fn node(dep_path: &str, children: &[(&str, &str)], has_bin: bool) -> PackageNode {
        let dep_path = DepPath::new(dep_path);
        let (name, version) = dep_path
            .name_and_version()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .unwrap_or_default();
        PackageNode {
            pkg_id_with_patch_hash: dep_path.to_string(),
            directory: PathBuf::from("/vstore").join(dep_path.as_str()),
            modules_dir: PathBuf::from("/vstore").join(dep_path.as_str()),
            children: children
                .iter()
                .map(|(a, t)| ((*a).to_string(), DepPath::new(*t)))
                .collect(),
            dep_path,
            name,
            version,
            resolution: nmx_types::Resolution::default(),
            external_children: BTreeMap::new(),
            optional_dependency_aliases: BTreeSet::new(),
            optional: false,
            requires_build: false,
            has_bin,
            patch: None,
            is_built: false,
        }
    }

    fn lockfile_graph(nodes: Vec<PackageNode>, direct: &[(&str, &str)]) -> LockfileGraph {
        let mut graph = DependencyGraph::new();
        for node in nodes {
            graph.insert(node);
        }
        let importer = ImporterNode {
            id: ProjectId::root(),
            dir: PathBuf::from("/project"),
            modules_dir: PathBuf::from("/project/node_modules"),
            direct: direct
                .iter()
                .map(|(a, t)| {
                    (
                        (*a).to_string(),
                        DirectDependency::Package(DepPath::new(*t)),
                    )
                })
                .collect(),
        };
        LockfileGraph {
            graph,
            importers: BTreeMap::from([(ProjectId::root(), importer)]),
            ..LockfileGraph::default()
        }
    }

    fn all_private() -> HoistMatchers {
        HoistMatchers::new::<&str>(&[], &["*"]).unwrap()
    }

    #[test]
    fn test_direct_aliases_are_never_hoisted_over() {
        let graph = lockfile_graph(
            vec![
                node("a@1.0.0", &[("b", "b@2.0.0")], false),
                node("b@1.0.0", &[], false),
                node("b@2.0.0", &[], false),
            ],
            &[("a", "a@1.0.0"), ("b", "b@1.0.0")],
        );
        let result = hoist_graph(&graph, &all_private());
        assert!(!result.assignment.contains(&DepPath::new("b@2.0.0")));
        assert!(result.assignment.is_empty());
    }

    #[test]
    fn test_shallower_package_wins() {
        let graph = lockfile_graph(
            vec![
                node("a@1.0.0", &[("deep", "deep-owner@1.0.0"), ("c", "c@1.0.0")], false),
                node("deep-owner@1.0.0", &[("c", "c@2.0.0")], false),
                node("c@1.0.0", &[], true),
                node("c@2.0.0", &[], false),
            ],
            &[("a", "a@1.0.0")],
        );
        let result = hoist_graph(&graph, &all_private());
        assert_eq!(
            result.assignment.get(&DepPath::new("c@1.0.0")).unwrap()["c"],
            HoistKind::Private
        );
        assert!(!result.assignment.contains(&DepPath::new("c@2.0.0")));
        assert_eq!(
            result.bins,
            vec![HoistedBin {
                kind: HoistKind::Private,
                alias: "c".to_string(),
                dep_path: DepPath::new("c@1.0.0"),
            }]
        );
    }

    #[test]
    fn test_alias_conflicts_are_case_insensitive() {
        let graph = lockfile_graph(
            vec![
                node("a@1.0.0", &[("JSON", "json-upper@1.0.0")], false),
                node("b@1.0.0", &[("json", "json-lower@1.0.0")], false),
                node("json-upper@1.0.0", &[], false),
                node("json-lower@1.0.0", &[], false),
            ],
            &[("a", "a@1.0.0"), ("b", "b@1.0.0")],
        );
        let result = hoist_graph(&graph, &all_private());
        assert_eq!(result.assignment.alias_count(), 1);
        assert!(result.assignment.contains(&DepPath::new("json-upper@1.0.0")));
    }

    #[test]
    fn test_cycles_terminate() {
        let graph = lockfile_graph(
            vec![
                node("a@1.0.0", &[("b", "b@1.0.0")], false),
                node("b@1.0.0", &[("a", "a@1.0.0"), ("c", "c@1.0.0")], false),
                node("c@1.0.0", &[], false),
            ],
            &[("a", "a@1.0.0")],
        );
        let result = hoist_graph(&graph, &all_private());
        assert_eq!(
            result.assignment.aliases(HoistKind::Private),
            BTreeSet::from(["b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_disabled_hoisting_assigns_nothing() {
        let graph = lockfile_graph(
            vec![
                node("a@1.0.0", &[("b", "b@1.0.0")], false),
                node("b@1.0.0", &[], false),
            ],
            &[("a", "a@1.0.0")],
        );
        let matchers = HoistMatchers::new::<&str>(&[], &[]).unwrap();
        assert_eq!(hoist_graph(&graph, &matchers), HoistResult::default());
    }
}
