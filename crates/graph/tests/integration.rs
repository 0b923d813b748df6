//! Integration tests for nmx-graph

use async_trait::async_trait;
use nmx_errors::{Error, GraphError, StorageError};
use nmx_events::{AppEvent, GraphEvent, SkipReason};
use nmx_graph::{
    calc_dep_state, dep_path_to_filename, snapshot_graph, DepStateCache, DepStateOptions, DirectDependency, FetchRequest, FetchResponse, GraphBuilder,
    GraphBuilderOptions, ImportMethod, ImportOutcome, PackageStore, PlatformChecker,
    RuntimeIdentity, SideEffectsUpload, VirtualStoreLayout,
};
use nmx_resources::{ResourceLimits, ResourceManager};
use proptest::prelude::*;
use nmx_types::{DepPath, Lockfile, PatchFile, ProjectId};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const LOCKFILE: &str = r"
lockfileVersion: '9.0'
importers:
  .:
    dependencies:
      pkg-a: 1.0.0
    devDependencies:
      dev-only: 1.0.0
packages:
  pkg-a@1.0.0:
    resolution:
      integrity: sha512-a
    dependencies:
      pkg-b: 1.0.0
    optionalDependencies:
      pkg-c: 1.0.0
  pkg-b@1.0.0:
    resolution:
      integrity: sha512-b
    requiresBuild: true
  pkg-c@1.0.0:
    resolution:
      integrity: sha512-c
    optional: true
    engines:
      node: '>=99'
  dev-only@1.0.0:
    resolution:
      integrity: sha512-d
";

#[derive(Default)]
struct FakeStore {
    fetches: AtomicUsize,
    imports: AtomicUsize,
    side_effects_keys: Mutex<Vec<String>>,
    fail: BTreeSet<String>,
    fail_import: BTreeSet<String>,
    cached: bool,
}

#[async_trait]
impl PackageStore for FakeStore {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.contains(request.dep_path.as_str()) {
            return Err(StorageError::FetchFailed {
                package: request.dep_path.to_string(),
                message: "offline".to_string(),
            }
            .into());
        }
        Ok(FetchResponse {
            directory: format!("/store/{}", request.dep_path).into(),
            files_index: request.dep_path.to_string(),
            requires_build: false,
        })
    }

    async fn import_package(
        &self,
        target_dir: &Path,
        fetched: &FetchResponse,
        side_effects_key: Option<&str>,
    ) -> Result<ImportOutcome, Error> {
        self.imports.fetch_add(1, Ordering::SeqCst);
        if self.fail_import.contains(&fetched.files_index) {
            return Err(std::io::Error::other("disk full").into());
        }
        tokio::fs::create_dir_all(target_dir).await?;
        if let Some(key) = side_effects_key {
            self.side_effects_keys.lock().unwrap().push(key.to_string());
        }
        Ok(ImportOutcome {
            method: ImportMethod::Hardlink,
            is_built: self.cached && side_effects_key.is_some(),
        })
    }

    async fn upload_side_effects(
        &self,
        _dir: &Path,
        _upload: &SideEffectsUpload,
    ) -> Result<(), Error> {
        Ok(())
    }

    async fn prune(&self) -> Result<(), Error> {
        Ok(())
    }
}

fn runtime() -> RuntimeIdentity {
    RuntimeIdentity {
        platform: "linux".to_string(),
        arch: "x64".to_string(),
        libc: Some("glibc".to_string()),
        node_version: "20.11.0".to_string(),
    }
}

fn options(root: &Path) -> GraphBuilderOptions {
    let layout = VirtualStoreLayout::new(root, "node_modules", root.join("node_modules/.nmx"), 120);
    let mut options = GraphBuilderOptions::new(layout);
    options.runtime = runtime();
    options
}

fn builder(store: Arc<FakeStore>) -> GraphBuilder {
    GraphBuilder::new(
        store,
        Arc::new(PlatformChecker),
        ResourceManager::new(ResourceLimits::for_testing()),
    )
}

#[tokio::test]
async fn test_build_skips_incompatible_optional_package() {
    let temp = tempfile::tempdir().unwrap();
    let lockfile = Lockfile::from_yaml_str(LOCKFILE).unwrap();
    let store = Arc::new(FakeStore::default());
    let (tx, mut rx) = nmx_events::channel();

    let (graph, summary) = builder(Arc::clone(&store))
        .with_event_sender(tx)
        .build(&lockfile, None, &options(temp.path()))
        .await
        .unwrap();

    let skipped = DepPath::new("pkg-c@1.0.0");
    assert!(graph.skipped.contains(&skipped));
    assert!(!graph.graph.contains(&skipped));
    assert_eq!(graph.graph.len(), 3);
    assert_eq!(summary.added.len(), 3);
    assert_eq!(store.fetches.load(Ordering::SeqCst), 3);

    let a = graph.graph.get(&DepPath::new("pkg-a@1.0.0")).unwrap();
    assert_eq!(a.children.len(), 1);
    assert!(a.directory.ends_with("pkg-a@1.0.0/node_modules/pkg-a"));
    assert!(a.directory.exists());

    let mut saw_skip = false;
    while let Ok(message) = rx.try_recv() {
        if let AppEvent::Graph(GraphEvent::PackageSkipped { reason, dep_path, .. }) = message.event
        {
            assert_eq!(reason, SkipReason::UnsupportedEngine);
            assert_eq!(dep_path, skipped);
            saw_skip = true;
        }
    }
    assert!(saw_skip);
}

#[tokio::test]
async fn test_side_effects_key_only_for_build_nodes() {
    let temp = tempfile::tempdir().unwrap();
    let lockfile = Lockfile::from_yaml_str(LOCKFILE).unwrap();
    let store = Arc::new(FakeStore {
        cached: true,
        ..FakeStore::default()
    });

    let (graph, _) = builder(Arc::clone(&store))
        .build(&lockfile, None, &options(temp.path()))
        .await
        .unwrap();

    let keys = store.side_effects_keys.lock().unwrap().clone();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("linux;x64;node20;deps="));
    assert!(graph.graph.get(&DepPath::new("pkg-b@1.0.0")).unwrap().is_built);
    assert!(!graph.graph.get(&DepPath::new("pkg-a@1.0.0")).unwrap().is_built);
}

#[tokio::test]
async fn test_production_include_drops_dev_subtree() {
    let temp = tempfile::tempdir().unwrap();
    let lockfile = Lockfile::from_yaml_str(LOCKFILE).unwrap();
    let mut options = options(temp.path());
    options.include = nmx_types::IncludedDependencies::production();

    let graph = builder(Arc::new(FakeStore::default()))
        .plan(&lockfile, &options)
        .unwrap();

    assert!(!graph.graph.contains(&DepPath::new("dev-only@1.0.0")));
    assert!(graph
        .lockfile_packages
        .contains(&DepPath::new("dev-only@1.0.0")));
    let root = &graph.importers[&ProjectId::root()];
    assert!(!root.direct.contains_key("dev-only"));
}

#[tokio::test]
async fn test_required_incompatible_package_fails() {
    let temp = tempfile::tempdir().unwrap();
    let mut lockfile = Lockfile::from_yaml_str(LOCKFILE).unwrap();
    let b = lockfile
        .packages
        .get_mut(&DepPath::new("pkg-b@1.0.0"))
        .unwrap();
    b.platform.os = vec!["!linux".to_string()];

    let err = builder(Arc::new(FakeStore::default()))
        .plan(&lockfile, &options(temp.path()))
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Graph(GraphError::UnsupportedPlatform { .. })
    ));

    let mut forced = options(temp.path());
    forced.force = true;
    let graph = builder(Arc::new(FakeStore::default()))
        .plan(&lockfile, &forced)
        .unwrap();
    assert!(graph.graph.contains(&DepPath::new("pkg-b@1.0.0")));
    assert!(graph.graph.contains(&DepPath::new("pkg-c@1.0.0")));
}

#[tokio::test]
async fn test_missing_required_dependency_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let mut lockfile = Lockfile::from_yaml_str(LOCKFILE).unwrap();
    lockfile.packages.remove(&DepPath::new("pkg-b@1.0.0"));

    let err = builder(Arc::new(FakeStore::default()))
        .plan(&lockfile, &options(temp.path()))
        .unwrap_err();
    match err {
        Error::Graph(GraphError::MissingDependency {
            dep_path,
            required_by,
        }) => {
            assert_eq!(dep_path, "pkg-b@1.0.0");
            assert_eq!(required_by, "pkg-a@1.0.0");
        }
        other => panic!("unexpected error: {other}"),
    }

    let graph = snapshot_graph(&lockfile, &options(temp.path()));
    assert!(graph.graph.contains(&DepPath::new("pkg-a@1.0.0")));
}

#[tokio::test]
async fn test_unknown_importer_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let lockfile = Lockfile::from_yaml_str(LOCKFILE).unwrap();
    let mut options = options(temp.path());
    options.importers = Some(vec![ProjectId::new("packages/missing")]);

    let err = builder(Arc::new(FakeStore::default()))
        .plan(&lockfile, &options)
        .unwrap_err();
    assert!(matches!(err, Error::Graph(GraphError::ImporterNotFound { .. })));
}

#[tokio::test]
async fn test_unchanged_packages_are_reused() {
    let temp = tempfile::tempdir().unwrap();
    let lockfile = Lockfile::from_yaml_str(LOCKFILE).unwrap();
    let options = options(temp.path());

    let first = Arc::new(FakeStore::default());
    builder(Arc::clone(&first))
        .build(&lockfile, None, &options)
        .await
        .unwrap();

    let mut wanted = lockfile.clone();
    wanted
        .packages
        .get_mut(&DepPath::new("dev-only@1.0.0"))
        .unwrap()
        .dependencies
        .insert("pkg-b".to_string(), "1.0.0".to_string());

    let second = Arc::new(FakeStore::default());
    let (graph, summary) = builder(Arc::clone(&second))
        .build(&wanted, Some(&lockfile), &options)
        .await
        .unwrap();

    assert_eq!(summary.added, vec![DepPath::new("dev-only@1.0.0")]);
    assert_eq!(summary.reused.len(), 2);
    assert_eq!(second.fetches.load(Ordering::SeqCst), 1);
    assert!(graph.graph.get(&DepPath::new("pkg-a@1.0.0")).unwrap().is_built);
}

#[tokio::test]
async fn test_failed_optional_fetch_is_dropped() {
    let temp = tempfile::tempdir().unwrap();
    let mut lockfile = Lockfile::from_yaml_str(LOCKFILE).unwrap();
    lockfile
        .packages
        .get_mut(&DepPath::new("pkg-c@1.0.0"))
        .unwrap()
        .engines
        .clear();
    let store = Arc::new(FakeStore {
        fail: BTreeSet::from(["pkg-c@1.0.0".to_string()]),
        ..FakeStore::default()
    });

    let (graph, summary) = builder(store)
        .build(&lockfile, None, &options(temp.path()))
        .await
        .unwrap();

    assert_eq!(summary.failed_optional, vec![DepPath::new("pkg-c@1.0.0")]);
    assert!(!graph.graph.contains(&DepPath::new("pkg-c@1.0.0")));
    assert!(graph.skipped.contains(&DepPath::new("pkg-c@1.0.0")));
    assert!(graph.graph.contains(&DepPath::new("pkg-a@1.0.0")));
}

#[tokio::test]
async fn test_failed_required_fetch_is_returned() {
    let temp = tempfile::tempdir().unwrap();
    let lockfile = Lockfile::from_yaml_str(LOCKFILE).unwrap();
    let store = Arc::new(FakeStore {
        fail: BTreeSet::from(["pkg-b@1.0.0".to_string()]),
        ..FakeStore::default()
    });

    let err = builder(Arc::clone(&store))
        .build(&lockfile, None, &options(temp.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Storage(StorageError::FetchFailed { .. })));
    assert_eq!(store.fetches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_link_references_become_external_children() {
    let temp = tempfile::tempdir().unwrap();
    let mut lockfile = Lockfile::from_yaml_str(LOCKFILE).unwrap();
    lockfile
        .importers
        .get_mut(&ProjectId::root())
        .unwrap()
        .dependencies
        .insert("local".to_string(), "link:packages/local".to_string());

    let graph = builder(Arc::new(FakeStore::default()))
        .plan(&lockfile, &options(temp.path()))
        .unwrap();
    let root = &graph.importers[&ProjectId::root()];
    assert_eq!(
        root.direct["local"],
        DirectDependency::External(temp.path().join("packages/local"))
    );
}

fn with_patch(lockfile: &Lockfile, key: &str, hash: &str) -> Lockfile {
    let mut patched = lockfile.clone();
    patched.patched_dependencies.insert(
        key.to_string(),
        PatchFile {
            path: format!("patches/{key}.patch"),
            hash: hash.to_string(),
            strict: true,
        },
    );
    patched
}

#[tokio::test]
async fn test_changed_patch_hash_is_not_reused() {
    let temp = tempfile::tempdir().unwrap();
    let lockfile = Lockfile::from_yaml_str(LOCKFILE).unwrap();
    let options = options(temp.path());
    let installed = with_patch(&lockfile, "pkg-b@1.0.0", "h1");

    builder(Arc::new(FakeStore::default()))
        .build(&installed, None, &options)
        .await
        .unwrap();

    let unchanged = Arc::new(FakeStore::default());
    let (_, summary) = builder(Arc::clone(&unchanged))
        .build(&installed, Some(&installed), &options)
        .await
        .unwrap();
    assert!(summary.added.is_empty());
    assert_eq!(unchanged.fetches.load(Ordering::SeqCst), 0);

    let wanted = with_patch(&lockfile, "pkg-b@1.0.0", "h2");
    let store = Arc::new(FakeStore::default());
    let (graph, summary) = builder(Arc::clone(&store))
        .build(&wanted, Some(&installed), &options)
        .await
        .unwrap();

    let b = DepPath::new("pkg-b@1.0.0");
    assert_eq!(summary.added, vec![b.clone()]);
    assert_eq!(summary.reused.len(), 2);
    assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    let node = graph.graph.get(&b).unwrap();
    assert!(!node.is_built);
    assert_eq!(node.patch.as_ref().unwrap().hash, "h2");

    let keys = store.side_effects_keys.lock().unwrap().clone();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].ends_with(";patch=h2"));
}

#[tokio::test]
async fn test_side_effects_key_ignores_failed_optional_fetch() {
    let temp = tempfile::tempdir().unwrap();
    let mut lockfile = Lockfile::from_yaml_str(LOCKFILE).unwrap();
    lockfile
        .packages
        .get_mut(&DepPath::new("pkg-c@1.0.0"))
        .unwrap()
        .engines
        .clear();
    lockfile
        .packages
        .get_mut(&DepPath::new("pkg-a@1.0.0"))
        .unwrap()
        .requires_build = true;
    let store = Arc::new(FakeStore {
        fail: BTreeSet::from(["pkg-c@1.0.0".to_string()]),
        ..FakeStore::default()
    });

    let (graph, summary) = builder(Arc::clone(&store))
        .build(&lockfile, None, &options(temp.path()))
        .await
        .unwrap();
    assert_eq!(summary.failed_optional, vec![DepPath::new("pkg-c@1.0.0")]);

    let engine_name = runtime().engine_name();
    let expected = calc_dep_state(
        &graph.graph,
        &DepStateCache::new(),
        &DepPath::new("pkg-a@1.0.0"),
        &DepStateOptions {
            engine_name: &engine_name,
            include_dep_graph_hash: true,
            patch_file_hash: None,
        },
    )
    .unwrap();
    let keys = store.side_effects_keys.lock().unwrap().clone();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&expected));
}

#[tokio::test]
async fn test_failed_import_names_the_package() {
    let temp = tempfile::tempdir().unwrap();
    let lockfile = Lockfile::from_yaml_str(LOCKFILE).unwrap();
    let store = Arc::new(FakeStore {
        fail_import: BTreeSet::from(["pkg-b@1.0.0".to_string()]),
        ..FakeStore::default()
    });

    let err = builder(store)
        .build(&lockfile, None, &options(temp.path()))
        .await
        .unwrap_err();
    match err {
        Error::Storage(StorageError::ImportFailed { package, path, .. }) => {
            assert_eq!(package, "pkg-b@1.0.0");
            assert!(path.ends_with("pkg-b@1.0.0/node_modules/pkg-b"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

proptest! {
    #[test]
    fn prop_filenames_fit_and_stay_distinct(
        scope in "[a-z]{1,12}",
        name in "[a-zA-Z0-9-]{1,40}",
        version in "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}",
        peers in proptest::collection::vec("[a-z]{1,20}@[0-9]\\.[0-9]\\.[0-9]", 0..6),
        max_len in 40usize..160,
    ) {
        let peer_suffix: String = peers.iter().map(|peer| format!("({peer})")).collect();
        let dep_path = DepPath::new(format!("@{scope}/{name}@{version}{peer_suffix}"));
        let filename = dep_path_to_filename(&dep_path, max_len);

        prop_assert!(filename.chars().count() <= max_len);
        prop_assert!(!filename.contains('/'));
        prop_assert_eq!(&filename, &dep_path_to_filename(&dep_path, max_len));

        let other = DepPath::new(format!("@{scope}/{name}@{version}{peer_suffix}(extra@1.0.0)"));
        prop_assert_ne!(filename, dep_path_to_filename(&other, max_len));
    }
}
