//! Integration tests for nmx-hoist

use nmx_graph::{
    DependencyGraph, DirectDependency, ImporterNode, LockfileGraph, PackageNode,
    VirtualStoreLayout,
};
use nmx_hoist::{
    hoist_dir, hoist_graph, hoisted_bin_sources, BinLinker, HoistLinker, HoistMatchers,
};
use nmx_resources::{ResourceLimits, ResourceManager};
use nmx_root::EntryKind;
use nmx_types::{DepPath, HoistKind, ProjectId, Resolution};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

fn node(layout: &VirtualStoreLayout, dep_path: &str, children: &[(&str, &str)]) -> PackageNode {
    let dep_path = DepPath::new(dep_path);
    let (name, version) = dep_path
        .name_and_version()
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .unwrap();
    PackageNode {
        pkg_id_with_patch_hash: dep_path.to_string(),
        directory: layout.package_dir(&dep_path, &name),
        modules_dir: layout.package_modules_dir(&dep_path),
        children: children
            .iter()
            .map(|(alias, target)| ((*alias).to_string(), DepPath::new(*target)))
            .collect(),
        dep_path,
        name,
        version,
        resolution: Resolution::default(),
        external_children: BTreeMap::new(),
        optional_dependency_aliases: BTreeSet::new(),
        optional: false,
        requires_build: false,
        has_bin: false,
        patch: None,
        is_built: false,
    }
}

fn lockfile_graph(nodes: Vec<PackageNode>, direct: &[(&str, &str)], root: &Path) -> LockfileGraph {
    let mut graph = DependencyGraph::new();
    for node in nodes {
        graph.insert(node);
    }
    let importer = ImporterNode {
        id: ProjectId::root(),
        dir: root.to_path_buf(),
        modules_dir: root.join("node_modules"),
        direct: direct
            .iter()
            .map(|(alias, target)| {
                (
                    (*alias).to_string(),
                    DirectDependency::Package(DepPath::new(*target)),
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

fn layout(root: &Path) -> VirtualStoreLayout {
    VirtualStoreLayout::new(root, "node_modules", root.join("node_modules/.nmx"), 120)
}

fn resources() -> ResourceManager {
    ResourceManager::new(ResourceLimits::for_testing())
}

#[tokio::test]
async fn test_placement_respects_existing_entries() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path();
    let layout = layout(root);
    let mut b = node(&layout, "b@1.0.0", &[]);
    b.has_bin = true;
    let graph = lockfile_graph(
        vec![
            node(
                &layout,
                "a@1.0.0",
                &[
                    ("b", "b@1.0.0"),
                    ("c", "c@1.0.0"),
                    ("d", "d@1.0.0"),
                    ("@types/node", "@types/node@20.0.0"),
                ],
            ),
            b,
            node(&layout, "c@1.0.0", &[]),
            node(&layout, "d@1.0.0", &[]),
            node(&layout, "@types/node@20.0.0", &[]),
        ],
        &[("a", "a@1.0.0")],
        root,
    );
    for node in graph.graph.nodes() {
        tokio::fs::create_dir_all(&node.directory).await.unwrap();
    }

    let private = hoist_dir(&layout, HoistKind::Private);
    let stale = layout.virtual_store_dir().join("old");
    tokio::fs::create_dir_all(&stale).await.unwrap();
    nmx_root::symlink_dir(&stale, &private.join("b")).await.unwrap();
    tokio::fs::create_dir_all(private.join("c")).await.unwrap();
    let external = root.join("elsewhere");
    tokio::fs::create_dir_all(&external).await.unwrap();
    nmx_root::symlink_dir(&external, &private.join("d")).await.unwrap();

    let matchers = HoistMatchers::new(&["@types/*"], &["*"]).unwrap();
    let result = hoist_graph(&graph, &matchers);
    let (tx, mut rx) = nmx_events::channel();
    let report = HoistLinker::new(resources())
        .with_event_sender(tx)
        .place(&graph, &result.assignment, &layout)
        .await
        .unwrap();

    let b_dir = &graph.graph.get(&DepPath::new("b@1.0.0")).unwrap().directory;
    assert_eq!(
        nmx_root::read_link_target(&private.join("b")).await.as_ref(),
        Some(b_dir)
    );
    assert_eq!(
        nmx_root::entry_kind(&private.join("c")).await,
        EntryKind::Directory
    );
    assert_eq!(
        nmx_root::read_link_target(&private.join("d")).await,
        Some(external)
    );
    assert!(nmx_root::exists(&root.join("node_modules/@types/node")).await);
    assert_eq!(report.public.len(), 1);
    assert_eq!(report.private.len(), 1);
    assert_eq!(report.skipped.len(), 2);

    let mut skipped_events = 0;
    while let Ok(message) = rx.try_recv() {
        if matches!(
            message.event,
            nmx_events::AppEvent::Hoist(nmx_events::HoistEvent::PlacementSkipped { .. })
        ) {
            skipped_events += 1;
        }
    }
    assert_eq!(skipped_events, 2);

    tokio::fs::create_dir_all(b_dir.join("bin")).await.unwrap();
    tokio::fs::write(b_dir.join("bin/cli.js"), b"#!/usr/bin/env node\n")
        .await
        .unwrap();
    tokio::fs::write(
        b_dir.join("package.json"),
        br#"{"name":"b","version":"1.0.0","bin":{"b-cli":"bin/cli.js","gone":"missing.js"}}"#,
    )
    .await
    .unwrap();

    let sources = hoisted_bin_sources(&result.bins, &graph, &layout);
    assert_eq!(sources.len(), 1);
    let links = BinLinker::new(resources()).link(&sources).await.unwrap();
    assert_eq!(links, vec![private.join(".bin").join("b-cli")]);
    assert_eq!(
        nmx_root::read_link_target(&links[0]).await,
        Some(b_dir.join("bin/cli.js"))
    );
}

#[tokio::test]
async fn test_placement_ignores_packages_missing_from_graph() {
    let temp = tempfile::tempdir().unwrap();
    let layout = layout(temp.path());
    let graph = lockfile_graph(Vec::new(), &[], temp.path());
    let mut assignment = nmx_hoist::HoistedAliasAssignment::new();
    assignment.insert(DepPath::new("gone@1.0.0"), "gone".to_string(), HoistKind::Private);

    let report = HoistLinker::new(resources())
        .place(&graph, &assignment, &layout)
        .await
        .unwrap();
    assert_eq!(report, nmx_hoist::PlacementReport::default());
}

fn alias_strategy() -> impl Strategy<Value = String> {
    "[a-z]{1,6}".prop_map(|s| format!("pkg-{s}"))
}

proptest! {
    #[test]
    fn prop_shallower_provider_wins(
        first in alias_strategy(),
        second in alias_strategy(),
        deeper in alias_strategy(),
    ) {
        prop_assume!(first != second && first != deeper && second != deeper);
        let root = PathBuf::from("/project");
        let layout = layout(&root);
        let n1 = format!("{first}@1.0.0");
        let n2 = format!("{second}@1.0.0");
        let d = format!("{deeper}@1.0.0");
        let graph = lockfile_graph(
            vec![
                node(
                    &layout,
                    "app@1.0.0",
                    &[(first.as_str(), n1.as_str()), (second.as_str(), n2.as_str())],
                ),
                node(&layout, &n1, &[("shared", "shared-near@1.0.0")]),
                node(&layout, &n2, &[(deeper.as_str(), d.as_str())]),
                node(&layout, &d, &[("shared", "shared-far@1.0.0")]),
                node(&layout, "shared-near@1.0.0", &[]),
                node(&layout, "shared-far@1.0.0", &[]),
            ],
            &[("app", "app@1.0.0")],
            &root,
        );
        let matchers = HoistMatchers::new::<&str>(&[], &["*"]).unwrap();
        let result = hoist_graph(&graph, &matchers);
        prop_assert!(result.assignment.contains(&DepPath::new("shared-near@1.0.0")));
        prop_assert!(!result.assignment.contains(&DepPath::new("shared-far@1.0.0")));
    }

    #[test]
    fn prop_hoisting_is_deterministic(
        edges in proptest::collection::vec((0usize..6, 0usize..6, "[a-c]{1,2}"), 0..20),
        public in proptest::collection::vec("[a-c*!]{1,3}", 0..3),
    ) {
        let root = PathBuf::from("/project");
        let layout = layout(&root);
        let names: Vec<String> = (0..6).map(|i| format!("n{i}@1.0.0")).collect();
        let mut children: Vec<Vec<(String, String)>> = vec![Vec::new(); 6];
        for (from, to, alias) in &edges {
            children[*from].push((alias.clone(), names[*to].clone()));
        }
        let nodes: Vec<PackageNode> = names
            .iter()
            .zip(&children)
            .map(|(name, kids)| {
                let kids: Vec<(&str, &str)> =
                    kids.iter().map(|(a, t)| (a.as_str(), t.as_str())).collect();
                node(&layout, name, &kids)
            })
            .collect();
        let graph = lockfile_graph(nodes, &[("n0", "n0@1.0.0")], &root);

        let private = vec!["*".to_string()];
        let Ok(matchers) = HoistMatchers::new(&public[..], &private[..]) else {
            return Ok(());
        };
        let first = hoist_graph(&graph, &matchers);
        let second = hoist_graph(&graph.clone(), &matchers);
        prop_assert_eq!(first, second);
    }
}
