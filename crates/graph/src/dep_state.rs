//! Dependency state fingerprints
//!
//! A node's state object maps each child's package identity to that
//! child's own state object. Aliases do not appear, so renaming an alias
//! keeps the fingerprint stable. A child already on the active ancestor
//! chain is recorded as an empty object, which keeps cyclic graphs finite.

use crate::DependencyGraph;
use dashmap::DashMap;
use nmx_errors::Error;
use nmx_types::DepPath;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Structural description of a node's transitive dependencies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DepStateObj(BTreeMap<String, Arc<DepStateObj>>);

impl DepStateObj {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, pkg_id: &str) -> Option<&DepStateObj> {
        self.0.get(pkg_id).map(AsRef::as_ref)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl Serialize for DepStateObj {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value.as_ref())?;
        }
        map.end()
    }
}

/// Memo table of state objects, shared by every caller in one install run
///
/// Entries are written once per dependency path. Two tasks racing on the
/// same entry compute identical values, so the last write is harmless.
#[derive(Debug, Default)]
pub struct DepStateCache {
    memo: DashMap<DepPath, Arc<DepStateObj>>,
}

impl DepStateCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, dep_path: &DepPath) -> Option<Arc<DepStateObj>> {
        self.memo.get(dep_path).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.memo.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.memo.is_empty()
    }

    /// Forget one entry, e.g. after its patch hash changed
    pub fn invalidate(&self, dep_path: &DepPath) {
        self.memo.remove(dep_path);
    }

    /// Forget every entry
    pub fn clear(&self) {
        self.memo.clear();
    }

    /// State object of a node, computed on first use
    #[must_use]
    pub fn state_obj(&self, graph: &DependencyGraph, dep_path: &DepPath) -> Arc<DepStateObj> {
        self.compute(graph, dep_path, &BTreeSet::new())
    }

    fn compute(
        &self,
        graph: &DependencyGraph,
        dep_path: &DepPath,
        parents: &BTreeSet<String>,
    ) -> Arc<DepStateObj> {
        if let Some(cached) = self.get(dep_path) {
            return cached;
        }
        let Some(node) = graph.get(dep_path) else {
            return Arc::new(DepStateObj::default());
        };

        let mut next_parents = parents.clone();
        next_parents.insert(node.pkg_id_with_patch_hash.clone());

        let mut state = BTreeMap::new();
        for child_path in node.children.values() {
            let Some(child) = graph.get(child_path) else {
                continue;
            };
            let value = if next_parents.contains(&child.pkg_id_with_patch_hash) {
                Arc::new(DepStateObj::default())
            } else {
                self.compute(graph, child_path, &next_parents)
            };
            state.insert(child.pkg_id_with_patch_hash.clone(), value);
        }

        let state = Arc::new(DepStateObj(state));
        self.memo.insert(dep_path.clone(), Arc::clone(&state));
        state
    }
}

/// Inputs of a dependency state key besides the graph itself
#[derive(Debug, Clone, Copy)]
pub struct DepStateOptions<'a> {
    /// Runtime identity prefix, see [`crate::RuntimeIdentity::engine_name`]
    pub engine_name: &'a str,
    /// Include the `deps=` segment (the node has a build requirement)
    pub include_dep_graph_hash: bool,
    pub patch_file_hash: Option<&'a str>,
}

/// Compute the side-effects cache key of a node
///
/// The key is `<engine>[;deps=<hash>][;patch=<hash>]`.
///
/// # Errors
///
/// Returns an error if the state object cannot be serialized for hashing.
pub fn calc_dep_state(
    graph: &DependencyGraph,
    cache: &DepStateCache,
    dep_path: &DepPath,
    options: &DepStateOptions<'_>,
) -> Result<String, Error> {
    let mut key = options.engine_name.to_string();
    if options.include_dep_graph_hash {
        let state = cache.state_obj(graph, dep_path);
        let hash = nmx_hash::hash_object(state.as_ref())?;
        key.push_str(";deps=");
        key.push_str(&hash.to_hex());
    }
    if let Some(patch_hash) = options.patch_file_hash {
        key.push_str(";patch=");
        key.push_str(patch_hash);
    }
    Ok(key)
}
