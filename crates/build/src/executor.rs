//! Concurrent build execution
//!
//! Chunks run strictly in order; nodes inside a chunk run concurrently
//! under the build semaphore. A package installed at several locations is
//! built once and hard-linked into the others.

use crate::in_flight::{BuiltPackage, InFlightBuilds, SharedBuild};
use crate::policy::{AllowAll, BuildPolicy};
use crate::scripts::{
    effective_manifest, script_env, PatchApplier, PatchRequest, ScriptRunner, LIFECYCLE_STAGES,
};
use crate::sequencer::BuildPlan;
use futures::future::join_all;
use nmx_errors::{BuildError, Error, GraphError, InstallError};
use nmx_events::{AppEvent, BuildEvent, EventEmitter, EventSender, FailureContext, SkipReason};
use nmx_graph::{
    calc_dep_state, DepStateCache, DepStateOptions, DependencyGraph, PackageStore,
    SideEffectsUpload,
};
use nmx_resources::{acquire_semaphore_permit, ResourceManager};
use nmx_types::{DepPath, PackageManifest};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Settings of one build run
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub ignore_scripts: bool,
    pub side_effects_cache_write: bool,
    /// Runtime prefix of side-effects cache keys
    pub engine_name: String,
    /// Directory the install was started from
    pub lockfile_dir: PathBuf,
    pub extra_env: BTreeMap<String, String>,
    /// Further directories a package is installed at, besides its own
    ///
    /// The virtual store places each package once, so installs leave this
    /// empty. Layouts that copy one package to several locations fill it
    /// in so the package is built once and hard-linked elsewhere.
    pub extra_locations: BTreeMap<DepPath, Vec<PathBuf>>,
}

impl BuildOptions {
    #[must_use]
    pub fn from_config(
        config: &nmx_config::BuildConfig,
        lockfile_dir: &Path,
        engine_name: impl Into<String>,
    ) -> Self {
        Self {
            ignore_scripts: config.ignore_scripts,
            side_effects_cache_write: config.side_effects_cache_write,
            engine_name: engine_name.into(),
            lockfile_dir: lockfile_dir.to_path_buf(),
            extra_env: config.extra_env.clone(),
            extra_locations: BTreeMap::new(),
        }
    }
}

/// What a build run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutcome {
    pub built: BTreeSet<DepPath>,
    /// Packages whose scripts the build policy withheld
    pub ignored_builds: BTreeSet<DepPath>,
    /// Optional packages whose build failed
    pub failed_optional: BTreeSet<DepPath>,
    pub side_effects_cached: BTreeSet<DepPath>,
}

impl BuildOutcome {
    /// Record the results on the graph the plan was made from
    pub fn apply(&self, graph: &mut DependencyGraph) {
        for dep_path in &self.built {
            if let Some(node) = graph.get_mut(dep_path) {
                node.is_built = true;
            }
        }
    }
}

struct BuildContext {
    graph: Arc<DependencyGraph>,
    options: BuildOptions,
    runner: Arc<dyn ScriptRunner>,
    patcher: Arc<dyn PatchApplier>,
    store: Arc<dyn PackageStore>,
    policy: Arc<dyn BuildPolicy>,
    dep_state: Arc<DepStateCache>,
    in_flight: Arc<InFlightBuilds>,
    tx: Option<EventSender>,
}

struct TaskReport {
    dep_path: DepPath,
    shared: SharedBuild,
    duration_ms: u64,
}

/// Runs build plans
pub struct BuildExecutor {
    runner: Arc<dyn ScriptRunner>,
    patcher: Arc<dyn PatchApplier>,
    store: Arc<dyn PackageStore>,
    policy: Arc<dyn BuildPolicy>,
    resources: ResourceManager,
    dep_state: Arc<DepStateCache>,
    tx: Option<EventSender>,
}

impl EventEmitter for BuildExecutor {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

impl BuildExecutor {
    pub fn new(
        runner: Arc<dyn ScriptRunner>,
        patcher: Arc<dyn PatchApplier>,
        store: Arc<dyn PackageStore>,
        resources: ResourceManager,
    ) -> Self {
        Self {
            runner,
            patcher,
            store,
            policy: Arc::new(AllowAll),
            resources,
            dep_state: Arc::new(DepStateCache::new()),
            tx: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn BuildPolicy>) -> Self {
        self.policy = policy;
        self
    }

    #[must_use]
    pub fn with_dep_state_cache(mut self, cache: Arc<DepStateCache>) -> Self {
        self.dep_state = cache;
        self
    }

    #[must_use]
    pub fn with_event_sender(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Execute a build plan
    ///
    /// Failures of optional packages are reported and skipped. The first
    /// failure of a required package is returned once the rest of its
    /// chunk has settled; later chunks are not started.
    ///
    /// # Errors
    ///
    /// Returns an error if a required package fails to patch or build, or
    /// a build task cannot be scheduled.
    pub async fn execute(
        &self,
        graph: Arc<DependencyGraph>,
        plan: &BuildPlan,
        options: &BuildOptions,
    ) -> Result<BuildOutcome, Error> {
        let context = Arc::new(BuildContext {
            graph: Arc::clone(&graph),
            options: options.clone(),
            runner: Arc::clone(&self.runner),
            patcher: Arc::clone(&self.patcher),
            store: Arc::clone(&self.store),
            policy: Arc::clone(&self.policy),
            dep_state: Arc::clone(&self.dep_state),
            in_flight: Arc::new(InFlightBuilds::new()),
            tx: self.tx.clone(),
        });
        let semaphore = self.resources.build_semaphore();
        let mut outcome = BuildOutcome::default();

        for (index, chunk) in plan.chunks.iter().enumerate() {
            self.emit(AppEvent::Build(BuildEvent::ChunkStarted {
                index,
                packages: chunk.clone(),
            }));

            let mut handles = Vec::new();
            for dep_path in chunk {
                let Some(node) = graph.get(dep_path) else {
                    continue;
                };
                let extra = options.extra_locations.get(dep_path);
                let locations = std::iter::once(node.directory.clone())
                    .chain(extra.into_iter().flatten().cloned());
                for location in locations {
                    let context = Arc::clone(&context);
                    let semaphore = Arc::clone(&semaphore);
                    let dep_path = dep_path.clone();
                    handles.push((
                        dep_path.clone(),
                        tokio::spawn(async move {
                            let _permit = acquire_semaphore_permit(semaphore, "build").await?;
                            build_location(context, dep_path, location).await
                        }),
                    ));
                }
            }

            let (dep_paths, joins): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
            let mut first_error = None;
            for (dep_path, joined) in dep_paths.into_iter().zip(join_all(joins).await) {
                let result = joined.unwrap_or_else(|e| {
                    Err(InstallError::TaskError {
                        message: format!("build task for {dep_path} failed: {e}"),
                    }
                    .into())
                });
                match result {
                    Ok(report) => self.record(&mut outcome, report),
                    Err(e) => {
                        if let Some(e) = self.soften(&mut outcome, &graph, &dep_path, e) {
                            first_error.get_or_insert(e);
                        }
                    }
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        if !outcome.ignored_builds.is_empty() {
            let names: BTreeSet<String> = outcome
                .ignored_builds
                .iter()
                .filter_map(|dep_path| graph.get(dep_path).map(|node| node.name.clone()))
                .collect();
            self.emit(AppEvent::Build(BuildEvent::IgnoredBuilds {
                names: names.into_iter().collect(),
            }));
        }
        Ok(outcome)
    }

    fn record(&self, outcome: &mut BuildOutcome, report: TaskReport) {
        let TaskReport {
            dep_path,
            shared,
            duration_ms,
        } = report;
        if !shared.executed {
            return;
        }
        let output = shared.output;
        if output.ignored {
            outcome.ignored_builds.insert(dep_path.clone());
        }
        if output.side_effects_key.is_some() {
            outcome.side_effects_cached.insert(dep_path.clone());
        }
        if output.is_built() {
            self.emit(AppEvent::Build(BuildEvent::PackageBuilt {
                dep_path: dep_path.clone(),
                duration_ms,
            }));
            outcome.built.insert(dep_path);
        }
    }

    /// Swallow the failure of an optional package, hand back anything else
    fn soften(
        &self,
        outcome: &mut BuildOutcome,
        graph: &DependencyGraph,
        dep_path: &DepPath,
        error: Error,
    ) -> Option<Error> {
        let failure = FailureContext::from_error(&error);
        match graph.get(dep_path) {
            Some(node) if node.optional => {
                self.emit(AppEvent::Build(BuildEvent::OptionalSkipped {
                    dep_path: dep_path.clone(),
                    name: node.name.clone(),
                    version: node.version.clone(),
                    reason: SkipReason::BuildFailure,
                    failure,
                }));
                outcome.failed_optional.insert(dep_path.clone());
                None
            }
            _ => {
                self.emit(AppEvent::Build(BuildEvent::Failed {
                    dep_path: dep_path.clone(),
                    failure,
                }));
                Some(error)
            }
        }
    }
}

async fn build_location(
    context: Arc<BuildContext>,
    dep_path: DepPath,
    location: PathBuf,
) -> Result<TaskReport, Error> {
    let started = Instant::now();
    let Some(primary) = context.graph.get(&dep_path).map(|node| node.directory.clone()) else {
        return Err(GraphError::InvalidDepPath {
            dep_path: dep_path.to_string(),
        }
        .into());
    };
    // Whichever location claims the build, it runs in the package's own directory.
    let shared = context
        .in_flight
        .run_once(&dep_path, || build_package(&context, &dep_path, &primary))
        .await?;

    if !shared.executed && shared.output.dir != location {
        nmx_root::hard_link_dir(&shared.output.dir, std::slice::from_ref(&location)).await?;
        context.tx.emit(AppEvent::Build(BuildEvent::OutputLinked {
            dep_path: dep_path.clone(),
            location: location.display().to_string(),
        }));
    }

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    Ok(TaskReport {
        dep_path,
        shared,
        duration_ms,
    })
}

async fn build_package(
    context: &BuildContext,
    dep_path: &DepPath,
    location: &Path,
) -> Result<BuiltPackage, Error> {
    let Some(node) = context.graph.get(dep_path) else {
        return Err(GraphError::InvalidDepPath {
            dep_path: dep_path.to_string(),
        }
        .into());
    };
    let options = &context.options;
    let mut output = BuiltPackage::new(location.to_path_buf());

    if let Some(patch) = &node.patch {
        let applied = context
            .patcher
            .apply(&PatchRequest {
                patch_file: patch.path.clone(),
                target_dir: location.to_path_buf(),
                strict: patch.strict,
            })
            .await?;
        if applied {
            output.patched = true;
        } else {
            let error = BuildError::PatchFailed {
                package: dep_path.to_string(),
                patch: patch.path.display().to_string(),
            };
            if patch.strict {
                return Err(error.into());
            }
            context.tx.emit(AppEvent::Build(BuildEvent::PatchSkipped {
                dep_path: dep_path.clone(),
                failure: FailureContext::from_error(&error),
            }));
        }
    }

    let allowed = context.policy.is_allowed(&node.name);
    if node.requires_build {
        if !allowed {
            tracing::debug!(%dep_path, "build not allowed by policy");
            output.ignored = true;
        } else if options.ignore_scripts {
            output.scripts_disabled = true;
        } else {
            let manifest =
                effective_manifest(PackageManifest::read(location).await?, location).await;
            let env = script_env(
                &options.extra_env,
                &node.name,
                &node.version,
                &options.lockfile_dir,
                &node.modules_dir,
            );
            for stage in LIFECYCLE_STAGES {
                if manifest.script(stage).is_some() {
                    context.tx.emit(AppEvent::Build(BuildEvent::PackageStarted {
                        dep_path: dep_path.clone(),
                        stage: stage.to_string(),
                    }));
                }
                if context.runner.run(stage, &manifest, location, &env).await? {
                    output.ran_scripts = true;
                }
            }
        }
    }

    if (output.ran_scripts || output.patched) && options.side_effects_cache_write && allowed {
        output.side_effects_key = upload_side_effects(context, dep_path, location).await;
    }
    Ok(output)
}

/// Upload failures are reported, never fatal
async fn upload_side_effects(
    context: &BuildContext,
    dep_path: &DepPath,
    location: &Path,
) -> Option<String> {
    let node = context.graph.get(dep_path)?;
    let key = calc_dep_state(
        &context.graph,
        &context.dep_state,
        dep_path,
        &DepStateOptions {
            engine_name: &context.options.engine_name,
            include_dep_graph_hash: node.requires_build,
            patch_file_hash: node.patch.as_ref().map(|patch| patch.hash.as_str()),
        },
    );
    let uploaded = match key {
        Ok(key) => context
            .store
            .upload_side_effects(
                location,
                &SideEffectsUpload {
                    dep_path: dep_path.clone(),
                    pkg_id: node.pkg_id_with_patch_hash.clone(),
                    cache_key: key.clone(),
                },
            )
            .await
            .map(|()| key),
        Err(e) => Err(e),
    };
    match uploaded {
        Ok(key) => {
            context.tx.emit(AppEvent::Build(BuildEvent::SideEffectsCached {
                dep_path: dep_path.clone(),
                state_key: key.clone(),
            }));
            Some(key)
        }
        Err(e) => {
            let error = BuildError::SideEffectsUploadFailed {
                package: dep_path.to_string(),
                message: e.to_string(),
            };
            context.tx.emit_warning(error.to_string());
            None
        }
    }
}
