//! Main installer implementation

use crate::link::DependencyLinker;
use crate::manifest::ModulesManifest;
use crate::InstallContext;
use nmx_build::{
    build_sequence, BuildExecutor, BuildOptions, BuildOutcome, BuildPolicy, ListedBuildPolicy,
    PatchApplier, ScriptRunner, ShellScriptRunner,
};
use nmx_config::Config;
use nmx_errors::{Error, InstallError};
use nmx_events::{EventEmitter, EventSender};
use nmx_graph::{
    snapshot_graph, DepStateCache, GraphBuilder, GraphBuilderOptions, InstallabilityChecker,
    LockfileGraph, PackageStore, PlatformChecker, RuntimeIdentity, VirtualStoreLayout,
};
use nmx_hoist::{
    hoist_graph, hoisted_bin_sources, BinLinker, HoistLinker, HoistMatchers,
    HoistedAliasAssignment,
};
use nmx_prune::{PruneOptions, PruneResult, Pruner};
use nmx_resources::ResourceManager;
use nmx_types::{DepPath, IncludedDependencies, InstallReport, Lockfile, ProjectId};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// File name of the lockfile an install reads from the lockfile directory
pub const WANTED_LOCKFILE: &str = "nmx-lock.yaml";

/// What the previous install left behind
struct PreviousInstall {
    lockfile: Option<Lockfile>,
    hoisted: HoistedAliasAssignment,
    skipped: BTreeSet<DepPath>,
    included: IncludedDependencies,
}

/// Turns lockfiles into `node_modules` trees
pub struct Installer {
    config: Config,
    store: Arc<dyn PackageStore>,
    checker: Arc<dyn InstallabilityChecker>,
    runner: Arc<dyn ScriptRunner>,
    patcher: Arc<dyn PatchApplier>,
    policy: Arc<dyn BuildPolicy>,
    resources: ResourceManager,
}

impl std::fmt::Debug for Installer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Installer {
    /// Create an installer with the default platform checker, shell script
    /// runner and the build policy from `config`
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn PackageStore>, patcher: Arc<dyn PatchApplier>) -> Self {
        let resources = ResourceManager::new(&config);
        let policy = Arc::new(ListedBuildPolicy::from_config(&config.build));
        Self {
            config,
            store,
            checker: Arc::new(PlatformChecker),
            runner: Arc::new(ShellScriptRunner),
            patcher,
            policy,
            resources,
        }
    }

    #[must_use]
    pub fn with_checker(mut self, checker: Arc<dyn InstallabilityChecker>) -> Self {
        self.checker = checker;
        self
    }

    #[must_use]
    pub fn with_script_runner(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.runner = runner;
        self
    }

    #[must_use]
    pub fn with_build_policy(mut self, policy: Arc<dyn BuildPolicy>) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_resources(mut self, resources: ResourceManager) -> Self {
        self.resources = resources;
        self
    }

    /// Install the lockfile found in `lockfile_dir`
    ///
    /// # Errors
    ///
    /// Returns [`InstallError::LockfileUnreadable`] when there is no
    /// lockfile, and any error of [`Installer::install`].
    pub async fn install_from_dir(
        &self,
        lockfile_dir: &Path,
        context: InstallContext,
    ) -> Result<InstallReport, Error> {
        let path = lockfile_dir.join(WANTED_LOCKFILE);
        let Some(wanted) = Lockfile::load(&path).await? else {
            return Err(InstallError::LockfileUnreadable {
                path: path.display().to_string(),
                message: "file not found".to_string(),
            }
            .into());
        };
        self.install(lockfile_dir, &wanted, context).await
    }

    /// Make the modules tree of `lockfile_dir` match `wanted`
    ///
    /// Stale state is removed first, then packages are imported, linked,
    /// hoisted and built. The installed lockfile and the modules manifest
    /// are written last, so an interrupted run is retried from the
    /// previous state.
    ///
    /// # Errors
    ///
    /// Returns an error if the lockfile is inconsistent, a required
    /// package is incompatible or fails to fetch, link or build, or the
    /// install state cannot be written.
    pub async fn install(
        &self,
        lockfile_dir: &Path,
        wanted: &Lockfile,
        context: InstallContext,
    ) -> Result<InstallReport, Error> {
        let started = Instant::now();
        let tx = context.event_sender.clone();
        tx.emit_operation_started("install");

        let result = self.run(lockfile_dir, wanted, &context).await;
        match &result {
            Ok(_) => tx.emit_operation_completed("install", true),
            Err(e) => tx.emit_operation_failed("install", e.to_string()),
        }
        result.map(|mut report| {
            report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            report
        })
    }

    #[allow(clippy::too_many_lines)]
    async fn run(
        &self,
        lockfile_dir: &Path,
        wanted: &Lockfile,
        context: &InstallContext,
    ) -> Result<InstallReport, Error> {
        let tx = context.event_sender.as_ref();
        let layout = VirtualStoreLayout::from_config(&self.config, lockfile_dir);
        let matchers = HoistMatchers::from_config(&self.config.hoist)?;
        let force = context.force || self.config.install.force;
        let dry_run = context.dry_run || self.config.install.dry_run;

        let pruner = with_sender(Pruner::new(self.resources.clone()), tx, Pruner::with_event_sender)
            .with_store(Arc::clone(&self.store));
        let previous = self.previous_install(&layout, &pruner, tx, force, dry_run).await?;

        let runtime = RuntimeIdentity::from(&self.config.runtime);
        let options = GraphBuilderOptions {
            layout: layout.clone(),
            include: self.config.included(),
            runtime: runtime.clone(),
            force,
            skipped: previous.skipped.clone(),
            side_effects_cache_read: self.config.build.side_effects_cache_read,
            importers: (!context.importers.is_empty()).then(|| context.importers.clone()),
        };
        let importers = options.selected_importers(wanted);

        let dep_state = Arc::new(DepStateCache::new());
        let builder = with_sender(
            GraphBuilder::new(
                Arc::clone(&self.store),
                Arc::clone(&self.checker),
                self.resources.clone(),
            ),
            tx,
            GraphBuilder::with_event_sender,
        )
        .with_dep_state_cache(Arc::clone(&dep_state));
        let mut graph = builder.plan(wanted, &options)?;

        let previous_graph = match &previous.lockfile {
            Some(lockfile) => snapshot_graph(
                lockfile,
                &GraphBuilderOptions {
                    include: previous.included,
                    skipped: BTreeSet::new(),
                    importers: None,
                    ..options.clone()
                },
            ),
            None => LockfileGraph::default(),
        };

        let prune_options = PruneOptions {
            dry_run,
            ..PruneOptions::from_config(&self.config.install, importers.clone())
        };
        let pruned = pruner
            .prune(&previous_graph, &graph, &previous.hoisted, &layout, &prune_options)
            .await?;
        if dry_run {
            return Ok(InstallReport {
                removed: pruned.orphans.len(),
                skipped: graph.skipped.clone(),
                ..InstallReport::default()
            });
        }

        let summary = builder
            .materialize(&mut graph, wanted, previous.lockfile.as_ref(), &options)
            .await?;

        let linker = with_sender(
            DependencyLinker::new(self.resources.clone()),
            tx,
            DependencyLinker::with_event_sender,
        );
        linker.link_packages(&graph, &summary.added).await?;
        linker
            .link_importers(&graph, &importers, self.config.install.dedupe_direct_deps)
            .await?;

        let hoisted = hoist_graph(&graph, &matchers);
        with_sender(
            HoistLinker::new(self.resources.clone()),
            tx,
            HoistLinker::with_event_sender,
        )
        .place(&graph, &hoisted.assignment, &layout)
        .await?;
        with_sender(
            BinLinker::new(self.resources.clone()),
            tx,
            BinLinker::with_event_sender,
        )
        .link(&hoisted_bin_sources(&hoisted.bins, &graph, &layout))
        .await?;

        let outcome = self
            .build(&graph, &importers, lockfile_dir, &runtime, context, dep_state)
            .await?;
        outcome.apply(&mut graph.graph);

        let mut failed_optional: BTreeSet<DepPath> = summary.failed_optional.into_iter().collect();
        failed_optional.extend(outcome.failed_optional.iter().cloned());
        let ignored_builds: BTreeSet<String> = outcome
            .ignored_builds
            .iter()
            .filter_map(|dep_path| graph.graph.get(dep_path).map(|node| node.name.clone()))
            .collect();

        let installed = installed_lockfile(
            wanted,
            previous.lockfile.as_ref(),
            &graph,
            &previous_graph,
            &importers,
        );
        installed.save(&layout.current_lockfile_path()).await?;

        let mut manifest = ModulesManifest::new(&layout, &self.config.hoist, options.include);
        manifest.hoisted_dependencies = hoisted.assignment;
        manifest.skipped = graph.skipped.iter().chain(&failed_optional).cloned().collect();
        manifest.ignored_builds.clone_from(&ignored_builds);
        manifest.record_locations(&graph, lockfile_dir);
        manifest.write(&layout.public_hoist_dir()).await?;

        Ok(InstallReport {
            added: summary.added.len(),
            removed: removed_packages(&pruned),
            ignored_builds,
            skipped: graph.skipped.clone(),
            built: outcome.built,
            failed_optional,
            duration_ms: 0,
        })
    }

    /// Read what the last install recorded, undoing hoisting it did with
    /// different patterns
    async fn previous_install(
        &self,
        layout: &VirtualStoreLayout,
        pruner: &Pruner,
        tx: Option<&EventSender>,
        force: bool,
        dry_run: bool,
    ) -> Result<PreviousInstall, Error> {
        let mut previous = PreviousInstall {
            lockfile: None,
            hoisted: HoistedAliasAssignment::new(),
            skipped: BTreeSet::new(),
            included: self.config.included(),
        };

        let manifest = ModulesManifest::read(&layout.public_hoist_dir()).await?;
        if let Some(manifest) = &manifest {
            if !manifest.is_compatible(layout) {
                if let Some(tx) = tx {
                    tx.emit_warning(format!(
                        "virtual store moved from {} to {}; reinstalling every package",
                        manifest.virtual_store_dir.display(),
                        layout.virtual_store_dir().display()
                    ));
                }
                return Ok(previous);
            }
        }

        previous.lockfile = match Lockfile::load(&layout.current_lockfile_path()).await {
            Ok(lockfile) => lockfile,
            Err(e) => {
                if let Some(tx) = tx {
                    tx.emit_warning_with_context(
                        "ignoring unreadable lockfile of the previous install",
                        e.to_string(),
                    );
                }
                None
            }
        };

        let Some(manifest) = manifest else {
            return Ok(previous);
        };
        previous.included = manifest.included;
        if !force {
            previous.skipped.clone_from(&manifest.skipped);
        }
        if manifest.hoist_patterns_changed(&self.config.hoist) {
            if !dry_run {
                let removed = pruner
                    .remove_hoisted_links(&manifest.hoisted_dependencies, layout)
                    .await?;
                tracing::debug!(count = removed.len(), "hoist patterns changed, removed hoisted links");
            }
        } else {
            previous.hoisted = manifest.hoisted_dependencies;
        }
        Ok(previous)
    }

    async fn build(
        &self,
        graph: &LockfileGraph,
        importers: &[ProjectId],
        lockfile_dir: &Path,
        runtime: &RuntimeIdentity,
        context: &InstallContext,
        dep_state: Arc<DepStateCache>,
    ) -> Result<BuildOutcome, Error> {
        let roots: Vec<DepPath> = graph.direct_dep_paths(importers.iter()).cloned().collect();
        let plan = build_sequence(&graph.graph, &roots);
        if plan.is_empty() {
            return Ok(BuildOutcome::default());
        }

        let mut options =
            BuildOptions::from_config(&self.config.build, lockfile_dir, runtime.engine_name());
        options.ignore_scripts |= context.ignore_scripts;

        let executor = with_sender(
            BuildExecutor::new(
                Arc::clone(&self.runner),
                Arc::clone(&self.patcher),
                Arc::clone(&self.store),
                self.resources.clone(),
            ),
            context.event_sender.as_ref(),
            BuildExecutor::with_event_sender,
        )
        .with_policy(Arc::clone(&self.policy))
        .with_dep_state_cache(dep_state);
        executor
            .execute(Arc::new(graph.graph.clone()), &plan, &options)
            .await
    }
}

fn with_sender<T>(value: T, tx: Option<&EventSender>, attach: fn(T, EventSender) -> T) -> T {
    match tx {
        Some(tx) => attach(value, tx.clone()),
        None => value,
    }
}

/// Orphans whose virtual store entry is gone
fn removed_packages(pruned: &PruneResult) -> usize {
    pruned
        .orphans
        .values()
        .filter(|paths| paths.first().is_some_and(|dir| !pruned.failed.contains(dir)))
        .count()
}

/// The lockfile describing what is on disk after this install
///
/// Importers outside this run keep their previous entries, along with the
/// packages only they need.
fn installed_lockfile(
    wanted: &Lockfile,
    previous: Option<&Lockfile>,
    graph: &LockfileGraph,
    previous_graph: &LockfileGraph,
    importers: &[ProjectId],
) -> Lockfile {
    let mut installed = wanted.clone();
    installed.importers.retain(|id, _| importers.contains(id));
    installed
        .packages
        .retain(|dep_path, _| graph.graph.contains(dep_path));

    let Some(previous) = previous else {
        return installed;
    };
    let others: Vec<ProjectId> = previous
        .importers
        .keys()
        .filter(|id| !importers.contains(id))
        .cloned()
        .collect();
    for id in &others {
        if let Some(snapshot) = previous.importers.get(id) {
            installed
                .importers
                .entry(id.clone())
                .or_insert_with(|| snapshot.clone());
        }
    }
    for dep_path in previous_graph.reachable_from_importers(&others) {
        if let Some(snapshot) = previous.packages.get(&dep_path) {
            installed
                .packages
                .entry(dep_path)
                .or_insert_with(|| snapshot.clone());
        }
    }
    installed
}
