//! Integration tests for nmx-install

use async_trait::async_trait;
use nmx_build::{PatchApplier, PatchRequest, ScriptRunner};
use nmx_config::Config;
use nmx_errors::{BuildError, Error, InstallError};
use nmx_graph::{
    FetchRequest, FetchResponse, ImportMethod, ImportOutcome, PackageStore, SideEffectsUpload,
};
use nmx_install::{InstallContext, Installer, ModulesManifest, WANTED_LOCKFILE};
use nmx_types::{DepPath, Lockfile, PackageManifest};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const LOCKFILE: &str = r"
lockfileVersion: '9.0'
importers:
  .:
    dependencies:
      pkg-a: 1.0.0
packages:
  pkg-a@1.0.0:
    resolution:
      integrity: sha512-a
    dependencies:
      pkg-b: 2.0.0
    optionalDependencies:
      pkg-c: 1.0.0
  pkg-b@2.0.0:
    resolution:
      integrity: sha512-b
    requiresBuild: true
  pkg-c@1.0.0:
    resolution:
      integrity: sha512-c
    optional: true
    engines:
      node: '>=99'
";

const UPGRADED_LOCKFILE: &str = r"
lockfileVersion: '9.0'
importers:
  .:
    dependencies:
      pkg-a: 1.1.0
packages:
  pkg-a@1.1.0:
    resolution:
      integrity: sha512-a11
    dependencies:
      pkg-b: 2.0.0
  pkg-b@2.0.0:
    resolution:
      integrity: sha512-b
    requiresBuild: true
";

/// Store that writes a `package.json` for every imported package
#[derive(Default)]
struct FakeStore {
    fetches: AtomicUsize,
    uploads: Mutex<Vec<SideEffectsUpload>>,
}

#[async_trait]
impl PackageStore for FakeStore {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, Error> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(FetchResponse {
            directory: format!("/store/{}", request.dep_path).into(),
            files_index: format!("{}\n{}", request.name, request.version),
            requires_build: false,
        })
    }

    async fn import_package(
        &self,
        target_dir: &Path,
        fetched: &FetchResponse,
        _side_effects_key: Option<&str>,
    ) -> Result<ImportOutcome, Error> {
        let (name, version) = fetched
            .files_index
            .split_once('\n')
            .ok_or_else(|| Error::internal("bad files index"))?;
        let scripts = if name == "pkg-b" || name == "pkg-c" {
            r#","scripts":{"install":"node build.js"}"#
        } else {
            ""
        };
        tokio::fs::create_dir_all(target_dir).await?;
        tokio::fs::write(
            target_dir.join("package.json"),
            format!(r#"{{"name":"{name}","version":"{version}"{scripts}}}"#),
        )
        .await?;
        Ok(ImportOutcome {
            method: ImportMethod::Hardlink,
            is_built: false,
        })
    }

    async fn upload_side_effects(
        &self,
        _dir: &Path,
        upload: &SideEffectsUpload,
    ) -> Result<(), Error> {
        self.uploads.lock().unwrap().push(upload.clone());
        Ok(())
    }

    async fn prune(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeRunner {
    runs: Mutex<Vec<(String, String)>>,
    failing: BTreeSet<String>,
}

#[async_trait]
impl ScriptRunner for FakeRunner {
    async fn run(
        &self,
        stage: &str,
        manifest: &PackageManifest,
        cwd: &Path,
        _env: &BTreeMap<String, String>,
    ) -> Result<bool, Error> {
        if manifest.script(stage).is_none() {
            return Ok(false);
        }
        let name = manifest.name.clone().unwrap_or_default();
        self.runs
            .lock()
            .unwrap()
            .push((name.clone(), stage.to_string()));
        if self.failing.contains(&name) {
            return Err(BuildError::ScriptFailed {
                package: name,
                stage: stage.to_string(),
                message: "exit status 1".to_string(),
            }
            .into());
        }
        tokio::fs::write(cwd.join(format!("{stage}.out")), stage.as_bytes()).await?;
        Ok(true)
    }
}

struct FakePatcher;

#[async_trait]
impl PatchApplier for FakePatcher {
    async fn apply(&self, _request: &PatchRequest) -> Result<bool, Error> {
        Ok(true)
    }
}

struct Fixture {
    _temp: tempfile::TempDir,
    root: PathBuf,
    store: Arc<FakeStore>,
    runner: Arc<FakeRunner>,
}

impl Fixture {
    fn new() -> Self {
        Self::with_runner(FakeRunner::default())
    }

    fn with_runner(runner: FakeRunner) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().to_path_buf();
        Self {
            _temp: temp,
            root,
            store: Arc::new(FakeStore::default()),
            runner: Arc::new(runner),
        }
    }

    fn config() -> Config {
        let mut config = Config::default();
        config.runtime.node_version = "20.11.0".to_string();
        config.runtime.platform = "linux".to_string();
        config.runtime.arch = "x64".to_string();
        config.runtime.libc = Some("glibc".to_string());
        config
    }

    fn installer(&self, config: Config) -> Installer {
        Installer::new(config, self.store.clone(), Arc::new(FakePatcher))
            .with_script_runner(self.runner.clone())
    }

    fn vstore(&self) -> PathBuf {
        self.root.join("node_modules/.nmx")
    }

    fn runs(&self) -> Vec<(String, String)> {
        self.runner.runs.lock().unwrap().clone()
    }
}

fn lockfile(yaml: &str) -> Lockfile {
    Lockfile::from_yaml_str(yaml).unwrap()
}

fn dep_paths(items: &[&str]) -> BTreeSet<DepPath> {
    items.iter().map(|item| DepPath::new(*item)).collect()
}

#[tokio::test]
async fn test_fresh_install_builds_and_skips() {
    let fixture = Fixture::new();
    let report = fixture
        .installer(Fixture::config())
        .install(&fixture.root, &lockfile(LOCKFILE), InstallContext::new())
        .await
        .unwrap();

    assert_eq!(report.added, 2);
    assert_eq!(report.removed, 0);
    assert_eq!(report.skipped, dep_paths(&["pkg-c@1.0.0"]));
    assert_eq!(report.built, dep_paths(&["pkg-b@2.0.0"]));
    assert!(report.ignored_builds.is_empty());
    assert!(report.failed_optional.is_empty());
    assert_eq!(
        fixture.runs(),
        vec![("pkg-b".to_string(), "install".to_string())]
    );
    assert_eq!(fixture.store.uploads.lock().unwrap().len(), 1);

    let vstore = fixture.vstore();
    let pkg_a = vstore.join("pkg-a@1.0.0/node_modules/pkg-a");
    let pkg_b = vstore.join("pkg-b@2.0.0/node_modules/pkg-b");
    assert_eq!(
        nmx_root::read_link_target(&fixture.root.join("node_modules/pkg-a"))
            .await
            .unwrap(),
        pkg_a
    );
    assert_eq!(
        nmx_root::read_link_target(&vstore.join("pkg-a@1.0.0/node_modules/pkg-b"))
            .await
            .unwrap(),
        pkg_b
    );
    assert!(pkg_b.join("install.out").exists());
    assert!(!vstore.join("pkg-c@1.0.0").exists());
    // Dependencies of dependencies are hoisted privately by default
    assert!(tokio::fs::symlink_metadata(vstore.join("node_modules/pkg-b"))
        .await
        .is_ok());

    let installed = Lockfile::load(&vstore.join("lock.yaml"))
        .await
        .unwrap()
        .unwrap();
    assert!(installed.packages.contains_key(&DepPath::new("pkg-a@1.0.0")));
    assert!(!installed.packages.contains_key(&DepPath::new("pkg-c@1.0.0")));

    let manifest = ModulesManifest::read(&fixture.root.join("node_modules"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(manifest.skipped, dep_paths(&["pkg-c@1.0.0"]));
    assert!(manifest
        .hoisted_dependencies
        .contains(&DepPath::new("pkg-b@2.0.0")));
}

#[tokio::test]
async fn test_repeated_install_reuses_everything() {
    let fixture = Fixture::new();
    let installer = fixture.installer(Fixture::config());
    let wanted = lockfile(LOCKFILE);
    installer
        .install(&fixture.root, &wanted, InstallContext::new())
        .await
        .unwrap();
    let fetches = fixture.store.fetches.load(Ordering::SeqCst);

    let report = installer
        .install(&fixture.root, &wanted, InstallContext::new())
        .await
        .unwrap();

    assert_eq!(report.added, 0);
    assert_eq!(report.removed, 0);
    assert!(report.built.is_empty());
    assert_eq!(report.skipped, dep_paths(&["pkg-c@1.0.0"]));
    assert_eq!(fixture.store.fetches.load(Ordering::SeqCst), fetches);
    assert_eq!(fixture.runs().len(), 1);
}

#[tokio::test]
async fn test_failed_optional_build_is_not_retried() {
    let fixture = Fixture::with_runner(FakeRunner {
        failing: ["pkg-c".to_string()].into_iter().collect(),
        ..FakeRunner::default()
    });
    let installer = fixture.installer(Fixture::config());
    let wanted = lockfile(&LOCKFILE.replace(
        "    engines:\n      node: '>=99'\n",
        "    requiresBuild: true\n",
    ));

    let first = installer
        .install(&fixture.root, &wanted, InstallContext::new())
        .await
        .unwrap();
    assert_eq!(first.failed_optional, dep_paths(&["pkg-c@1.0.0"]));
    assert_eq!(first.built, dep_paths(&["pkg-b@2.0.0"]));

    let second = installer
        .install(&fixture.root, &wanted, InstallContext::new())
        .await
        .unwrap();
    assert!(second.failed_optional.is_empty());
    assert!(second.built.is_empty());
    assert_eq!(second.skipped, dep_paths(&["pkg-c@1.0.0"]));

    let pkg_c_runs = fixture
        .runs()
        .into_iter()
        .filter(|(name, _)| name == "pkg-c")
        .count();
    assert_eq!(pkg_c_runs, 1);
    let manifest = ModulesManifest::read(&fixture.root.join("node_modules"))
        .await
        .unwrap()
        .unwrap();
    assert!(manifest.skipped.contains(&DepPath::new("pkg-c@1.0.0")));
}

#[tokio::test]
async fn test_upgrade_prunes_old_version() {
    let fixture = Fixture::new();
    let installer = fixture.installer(Fixture::config());
    installer
        .install(&fixture.root, &lockfile(LOCKFILE), InstallContext::new())
        .await
        .unwrap();

    let report = installer
        .install(
            &fixture.root,
            &lockfile(UPGRADED_LOCKFILE),
            InstallContext::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.added, 1);
    assert_eq!(report.removed, 1);
    assert!(report.built.is_empty());
    let vstore = fixture.vstore();
    assert!(!vstore.join("pkg-a@1.0.0").exists());
    assert!(vstore.join("pkg-b@2.0.0/node_modules/pkg-b/install.out").exists());
    assert_eq!(
        nmx_root::read_link_target(&fixture.root.join("node_modules/pkg-a"))
            .await
            .unwrap(),
        vstore.join("pkg-a@1.1.0/node_modules/pkg-a")
    );
    assert_eq!(fixture.runs().len(), 1);
}

#[tokio::test]
async fn test_dry_run_leaves_tree_untouched() {
    let fixture = Fixture::new();
    let installer = fixture.installer(Fixture::config());
    installer
        .install(&fixture.root, &lockfile(LOCKFILE), InstallContext::new())
        .await
        .unwrap();
    let fetches = fixture.store.fetches.load(Ordering::SeqCst);

    let report = installer
        .install(
            &fixture.root,
            &lockfile(UPGRADED_LOCKFILE),
            InstallContext::new().with_dry_run(true),
        )
        .await
        .unwrap();

    assert_eq!(report.removed, 1);
    assert_eq!(report.added, 0);
    assert!(fixture.vstore().join("pkg-a@1.0.0").exists());
    assert!(!fixture.vstore().join("pkg-a@1.1.0").exists());
    assert_eq!(fixture.store.fetches.load(Ordering::SeqCst), fetches);
}

#[tokio::test]
async fn test_build_policy_ignores_scripts() {
    let fixture = Fixture::new();
    let mut config = Fixture::config();
    config.build.never_built_dependencies = vec!["pkg-b".to_string()];

    let report = fixture
        .installer(config)
        .install(&fixture.root, &lockfile(LOCKFILE), InstallContext::new())
        .await
        .unwrap();

    assert!(report.built.is_empty());
    assert_eq!(
        report.ignored_builds,
        ["pkg-b".to_string()].into_iter().collect()
    );
    assert!(fixture.runs().is_empty());
    let manifest = ModulesManifest::read(&fixture.root.join("node_modules"))
        .await
        .unwrap()
        .unwrap();
    assert!(manifest.ignored_builds.contains("pkg-b"));
}

#[tokio::test]
async fn test_disabling_hoisting_removes_hoisted_links() {
    let fixture = Fixture::new();
    let wanted = lockfile(LOCKFILE);
    fixture
        .installer(Fixture::config())
        .install(&fixture.root, &wanted, InstallContext::new())
        .await
        .unwrap();
    let hoisted = fixture.vstore().join("node_modules/pkg-b");
    assert!(tokio::fs::symlink_metadata(&hoisted).await.is_ok());

    let mut config = Fixture::config();
    config.hoist.enabled = false;
    fixture
        .installer(config)
        .install(&fixture.root, &wanted, InstallContext::new())
        .await
        .unwrap();

    assert!(tokio::fs::symlink_metadata(&hoisted).await.is_err());
    let manifest = ModulesManifest::read(&fixture.root.join("node_modules"))
        .await
        .unwrap()
        .unwrap();
    assert!(manifest.hoist_pattern.is_none());
    assert!(manifest.hoisted_dependencies.is_empty());
}

#[tokio::test]
async fn test_install_from_dir_requires_lockfile() {
    let fixture = Fixture::new();
    let installer = fixture.installer(Fixture::config());

    let err = installer
        .install_from_dir(&fixture.root, InstallContext::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Install(InstallError::LockfileUnreadable { .. })
    ));

    tokio::fs::write(fixture.root.join(WANTED_LOCKFILE), LOCKFILE)
        .await
        .unwrap();
    let report = installer
        .install_from_dir(&fixture.root, InstallContext::new())
        .await
        .unwrap();
    assert_eq!(report.added, 2);
}
