//! Build ordering
//!
//! A node needs a build when it requires one itself, carries a patch, or
//! depends on something that needs a build. Only the part of the graph
//! reachable from the roots is considered. Strongly connected components
//! are collapsed so cycles land in one chunk.

use nmx_graph::DependencyGraph;
use nmx_types::DepPath;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet};

/// Ordered chunks of builds
///
/// Every chunk only depends on earlier chunks, except for members of one
/// dependency cycle which share a chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildPlan {
    pub chunks: Vec<Vec<DepPath>>,
    /// Every reachable node whose build subgraph is not empty
    pub needs_build: BTreeSet<DepPath>,
}

impl BuildPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Number of builds to execute
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    pub fn dep_paths(&self) -> impl Iterator<Item = &DepPath> {
        self.chunks.iter().flatten()
    }
}

/// Compute the build plan for everything reachable from `roots`
///
/// Chunks only list nodes that need their own build and are not built
/// yet; nodes that merely depend on builds still order the chunks.
#[must_use]
pub fn build_sequence(graph: &DependencyGraph, roots: &[DepPath]) -> BuildPlan {
    let reachable = graph.reachable_from(roots.iter());
    if reachable.is_empty() {
        return BuildPlan::default();
    }

    let mut dag: DiGraph<&DepPath, ()> = DiGraph::new();
    let mut index: BTreeMap<&DepPath, NodeIndex> = BTreeMap::new();
    for dep_path in &reachable {
        index.insert(dep_path, dag.add_node(dep_path));
    }
    for dep_path in &reachable {
        let Some(node) = graph.get(dep_path) else {
            continue;
        };
        for child in node.children.values() {
            if let (Some(&from), Some(&to)) = (index.get(dep_path), index.get(child)) {
                dag.add_edge(from, to, ());
            }
        }
    }

    // Components come out children first.
    let components = tarjan_scc(&dag);
    let mut component_of = vec![0usize; dag.node_count()];
    for (component, members) in components.iter().enumerate() {
        for member in members {
            component_of[member.index()] = component;
        }
    }

    let mut needs = vec![false; components.len()];
    let mut layer = vec![0usize; components.len()];
    for (component, members) in components.iter().enumerate() {
        let mut own = false;
        let mut child_layer: Option<usize> = None;
        for &member in members {
            if graph.get(dag[member]).is_some_and(|n| n.needs_own_build()) {
                own = true;
            }
            for child in dag.neighbors(member) {
                let child_component = component_of[child.index()];
                if child_component == component || !needs[child_component] {
                    continue;
                }
                let candidate = layer[child_component] + 1;
                child_layer = Some(child_layer.map_or(candidate, |l| l.max(candidate)));
            }
        }
        needs[component] = own || child_layer.is_some();
        layer[component] = child_layer.unwrap_or(0);
    }

    let mut plan = BuildPlan::default();
    let mut layered: BTreeMap<usize, BTreeSet<DepPath>> = BTreeMap::new();
    for (component, members) in components.iter().enumerate() {
        if !needs[component] {
            continue;
        }
        for &member in members {
            let dep_path = dag[member];
            plan.needs_build.insert(dep_path.clone());
            let Some(node) = graph.get(dep_path) else {
                continue;
            };
            if node.needs_own_build() && !node.is_built {
                layered
                    .entry(layer[component])
                    .or_default()
                    .insert(dep_path.clone());
            }
        }
    }
    plan.chunks = layered
        .into_values()
        .map(|chunk| chunk.into_iter().collect())
        .collect();
    plan
}
