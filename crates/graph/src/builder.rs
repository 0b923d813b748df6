//! Lockfile to dependency graph conversion
//!
//! Building happens in two phases. Planning is synchronous: it computes
//! install directories, applies installability checks and the include
//! policy, resolves every edge and drops whatever is no longer reachable
//! from an importer. Materialization then fetches and imports the planned
//! nodes concurrently, reusing directories an identical previous install
//! already produced.

use crate::dep_state::{calc_dep_state, DepStateCache, DepStateOptions};
use crate::installability::{InstallabilityChecker, InstallabilityRequest};
use crate::layout::VirtualStoreLayout;
use crate::node::{
    pkg_id_with_patch_hash, DependencyGraph, DirectDependency, ImporterNode, LockfileGraph,
    PackageNode,
};
use crate::store::{FetchRequest, FetchResponse, PackageStore};
use crate::RuntimeIdentity;
use futures::future::join_all;
use nmx_errors::{Error, GraphError, InstallError, StorageError};
use nmx_events::{AppEvent, EventEmitter, EventSender, GraphEvent, SkipReason};
use nmx_resources::{acquire_semaphore_permit, ResourceManager};
use nmx_types::{
    DepPath, DependenciesField, IncludedDependencies, Lockfile, PackageSnapshot, PatchInfo,
    ProjectId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Inputs of one graph build
#[derive(Debug, Clone)]
pub struct GraphBuilderOptions {
    pub layout: VirtualStoreLayout,
    pub include: IncludedDependencies,
    pub runtime: RuntimeIdentity,
    /// Install incompatible packages instead of skipping or failing
    pub force: bool,
    /// Packages to leave out without checking (recorded by a previous run)
    pub skipped: BTreeSet<DepPath>,
    /// Look up cached build side effects when importing
    pub side_effects_cache_read: bool,
    /// Importers to install; `None` selects every importer of the lockfile
    pub importers: Option<Vec<ProjectId>>,
}

impl GraphBuilderOptions {
    #[must_use]
    pub fn new(layout: VirtualStoreLayout) -> Self {
        Self {
            layout,
            include: IncludedDependencies::default(),
            runtime: RuntimeIdentity::default(),
            force: false,
            skipped: BTreeSet::new(),
            side_effects_cache_read: true,
            importers: None,
        }
    }

    /// The importers this build covers
    #[must_use]
    pub fn selected_importers(&self, lockfile: &Lockfile) -> Vec<ProjectId> {
        match &self.importers {
            Some(selected) => selected.clone(),
            None => lockfile.importers.keys().cloned().collect(),
        }
    }
}

/// What materialization did
#[derive(Debug, Clone, Default)]
pub struct MaterializeSummary {
    pub added: Vec<DepPath>,
    pub reused: Vec<DepPath>,
    /// Optional packages whose fetch or import failed and were dropped
    pub failed_optional: Vec<DepPath>,
}

/// Converts lockfiles into dependency graphs
pub struct GraphBuilder {
    store: Arc<dyn PackageStore>,
    checker: Arc<dyn InstallabilityChecker>,
    resources: ResourceManager,
    dep_state: Arc<DepStateCache>,
    tx: Option<EventSender>,
}

impl EventEmitter for GraphBuilder {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

impl GraphBuilder {
    pub fn new(
        store: Arc<dyn PackageStore>,
        checker: Arc<dyn InstallabilityChecker>,
        resources: ResourceManager,
    ) -> Self {
        Self {
            store,
            checker,
            resources,
            dep_state: Arc::new(DepStateCache::new()),
            tx: None,
        }
    }

    #[must_use]
    pub fn with_event_sender(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Share a dependency state cache with other stages of the install
    #[must_use]
    pub fn with_dep_state_cache(mut self, cache: Arc<DepStateCache>) -> Self {
        self.dep_state = cache;
        self
    }

    #[must_use]
    pub fn dep_state_cache(&self) -> Arc<DepStateCache> {
        Arc::clone(&self.dep_state)
    }

    /// Plan and materialize the graph of `wanted`
    ///
    /// `current` is the lockfile of the previous install, used for
    /// incremental reuse.
    ///
    /// # Errors
    ///
    /// Returns an error if the lockfile is inconsistent, a required package
    /// is incompatible, or fetching a required package fails.
    pub async fn build(
        &self,
        wanted: &Lockfile,
        current: Option<&Lockfile>,
        options: &GraphBuilderOptions,
    ) -> Result<(LockfileGraph, MaterializeSummary), Error> {
        let mut graph = self.plan(wanted, options)?;
        let summary = self
            .materialize(&mut graph, wanted, current, options)
            .await?;
        self.emit(AppEvent::Graph(GraphEvent::Built {
            nodes: graph.graph.len(),
            importers: graph.importers.len(),
            skipped: graph.skipped.len(),
        }));
        Ok((graph, summary))
    }

    /// Compute the graph without touching the store
    ///
    /// # Errors
    ///
    /// Returns an error if a required dependency is missing from the
    /// lockfile, an importer does not exist, or a required package is
    /// incompatible with the runtime.
    pub fn plan(
        &self,
        lockfile: &Lockfile,
        options: &GraphBuilderOptions,
    ) -> Result<LockfileGraph, Error> {
        let checker = (!options.force).then_some(self.checker.as_ref());
        let (graph, skips) = plan_graph(lockfile, options, checker, true)?;
        for (dep_path, name, version, incompatibility) in skips {
            self.emit(AppEvent::Graph(GraphEvent::PackageSkipped {
                dep_path,
                name,
                version,
                reason: incompatibility.reason,
                details: format!(
                    "wanted {}, current {}",
                    incompatibility.wanted, incompatibility.current
                ),
            }));
        }
        Ok(graph)
    }

    /// Fetch and import every planned node
    ///
    /// Nodes whose previous lockfile entry has the same dependencies,
    /// optional dependencies and patch hash, and whose directory still
    /// exists, are reused as already built. Everything else is fetched
    /// first; optional fetch failures are dropped from the graph before
    /// any side-effects key is computed, so the keys match the graph the
    /// build sees. The first failure of a required node is returned once
    /// every in-flight task of its phase has settled.
    ///
    /// # Errors
    ///
    /// Returns an error if a required node cannot be fetched or imported.
    #[allow(clippy::too_many_lines)]
    pub async fn materialize(
        &self,
        graph: &mut LockfileGraph,
        wanted: &Lockfile,
        current: Option<&Lockfile>,
        options: &GraphBuilderOptions,
    ) -> Result<MaterializeSummary, Error> {
        let semaphore = self.resources.fetch_semaphore();
        let mut summary = MaterializeSummary::default();

        let mut handles = Vec::with_capacity(graph.graph.len());
        for node in graph.graph.nodes() {
            let task = FetchTask {
                request: FetchRequest {
                    dep_path: node.dep_path.clone(),
                    name: node.name.clone(),
                    version: node.version.clone(),
                    resolution: node.resolution.clone(),
                },
                directory: node.directory.clone(),
                reusable: self.is_reusable(node, wanted, current),
                store: Arc::clone(&self.store),
                semaphore: Arc::clone(&semaphore),
            };
            handles.push((node.dep_path.clone(), tokio::spawn(task.run())));
        }

        let mut first_error: Option<Error> = None;
        let mut reused = Vec::new();
        let mut fetched = Vec::new();
        for (dep_path, result) in settle(handles, "fetch").await {
            match result {
                Ok(FetchOutcome::Reused) => reused.push(dep_path),
                Ok(FetchOutcome::Fetched(response)) => fetched.push((dep_path, response)),
                Err(err) => {
                    self.record_failure(graph, dep_path, err, &mut summary, &mut first_error);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        if !summary.failed_optional.is_empty() {
            drop_nodes(graph, &summary.failed_optional);
        }

        let shared = Arc::new(graph.graph.clone());
        let engine_name = options.runtime.engine_name();
        let mut handles = Vec::with_capacity(fetched.len());
        for (dep_path, response) in fetched {
            if !shared.contains(&dep_path) {
                continue;
            }
            let task = ImportTask {
                dep_path: dep_path.clone(),
                fetched: response,
                store: Arc::clone(&self.store),
                graph: Arc::clone(&shared),
                dep_state: Arc::clone(&self.dep_state),
                engine_name: engine_name.clone(),
                side_effects_cache_read: options.side_effects_cache_read,
                semaphore: Arc::clone(&semaphore),
            };
            handles.push((dep_path, tokio::spawn(task.run())));
        }

        let fetch_failures = summary.failed_optional.len();
        for (dep_path, result) in settle(handles, "import").await {
            match result {
                Ok(ImportedNode {
                    is_built,
                    requires_build,
                }) => {
                    if let Some(node) = graph.graph.get_mut(&dep_path) {
                        node.is_built = is_built;
                        node.requires_build |= requires_build;
                    }
                    self.emit(AppEvent::Graph(GraphEvent::PackageAdded {
                        dep_path: dep_path.clone(),
                    }));
                    summary.added.push(dep_path);
                }
                Err(err) => {
                    self.record_failure(graph, dep_path, err, &mut summary, &mut first_error);
                }
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }
        if summary.failed_optional.len() > fetch_failures {
            drop_nodes(graph, &summary.failed_optional[fetch_failures..]);
        }

        for dep_path in reused {
            let Some(node) = graph.graph.get_mut(&dep_path) else {
                continue;
            };
            node.is_built = true;
            self.emit(AppEvent::Graph(GraphEvent::PackageReused {
                dep_path: dep_path.clone(),
            }));
            summary.reused.push(dep_path);
        }
        Ok(summary)
    }

    /// Whether the previous install left an identical copy of `node`
    ///
    /// A changed patch hash also forgets the node's memoized dependency
    /// state.
    fn is_reusable(
        &self,
        node: &PackageNode,
        wanted: &Lockfile,
        current: Option<&Lockfile>,
    ) -> bool {
        if node.resolution.is_directory() {
            return false;
        }
        let Some(current) = current else {
            return false;
        };
        let (Some(previous), Some(next)) = (
            current.packages.get(&node.dep_path),
            wanted.packages.get(&node.dep_path),
        ) else {
            return false;
        };
        let previous_patch = current
            .patch_for(&node.name, &node.version)
            .map(|patch| patch.hash.as_str());
        let next_patch = wanted
            .patch_for(&node.name, &node.version)
            .map(|patch| patch.hash.as_str());
        if previous_patch != next_patch {
            tracing::debug!(dep_path = %node.dep_path, "patch changed, refetching");
            self.dep_state.invalidate(&node.dep_path);
            return false;
        }
        previous.same_children(next)
    }

    fn record_failure(
        &self,
        graph: &LockfileGraph,
        dep_path: DepPath,
        err: Error,
        summary: &mut MaterializeSummary,
        first_error: &mut Option<Error>,
    ) {
        let optional = graph.graph.get(&dep_path).is_some_and(|n| n.optional);
        if optional {
            self.emit_warning_with_context(
                format!("skipping optional dependency {dep_path}"),
                err.to_string(),
            );
            summary.failed_optional.push(dep_path);
        } else if first_error.is_none() {
            *first_error = Some(err);
        }
    }
}

/// Wait for every task, turning join failures into task errors
async fn settle<T>(
    handles: Vec<(DepPath, JoinHandle<Result<T, Error>>)>,
    stage: &str,
) -> Vec<(DepPath, Result<T, Error>)> {
    let (dep_paths, joins): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
    let results = join_all(joins).await;
    dep_paths
        .into_iter()
        .zip(results)
        .map(|(dep_path, joined)| {
            let result = joined.unwrap_or_else(|e| {
                Err(InstallError::TaskError {
                    message: format!("{stage} task for {dep_path} failed: {e}"),
                }
                .into())
            });
            (dep_path, result)
        })
        .collect()
}

enum FetchOutcome {
    Reused,
    Fetched(FetchResponse),
}

struct FetchTask {
    request: FetchRequest,
    directory: PathBuf,
    reusable: bool,
    store: Arc<dyn PackageStore>,
    semaphore: Arc<Semaphore>,
}

impl FetchTask {
    async fn run(self) -> Result<FetchOutcome, Error> {
        let _permit = acquire_semaphore_permit(self.semaphore, "fetch").await?;
        if self.reusable && nmx_root::exists(&self.directory).await {
            return Ok(FetchOutcome::Reused);
        }
        let fetched = self.store.fetch(&self.request).await?;
        Ok(FetchOutcome::Fetched(fetched))
    }
}

struct ImportedNode {
    is_built: bool,
    requires_build: bool,
}

struct ImportTask {
    dep_path: DepPath,
    fetched: FetchResponse,
    store: Arc<dyn PackageStore>,
    graph: Arc<DependencyGraph>,
    dep_state: Arc<DepStateCache>,
    engine_name: String,
    side_effects_cache_read: bool,
    semaphore: Arc<Semaphore>,
}

impl ImportTask {
    async fn run(self) -> Result<ImportedNode, Error> {
        let _permit = acquire_semaphore_permit(self.semaphore, "import").await?;
        let Some(node) = self.graph.get(&self.dep_path) else {
            return Err(GraphError::InvalidDepPath {
                dep_path: self.dep_path.to_string(),
            }
            .into());
        };
        let requires_build = node.requires_build || self.fetched.requires_build;

        let side_effects_key = if self.side_effects_cache_read
            && (requires_build || node.has_patch())
        {
            Some(calc_dep_state(
                &self.graph,
                &self.dep_state,
                &node.dep_path,
                &DepStateOptions {
                    engine_name: &self.engine_name,
                    include_dep_graph_hash: requires_build,
                    patch_file_hash: node.patch.as_ref().map(|p| p.hash.as_str()),
                },
            )?)
        } else {
            None
        };

        let outcome = self
            .store
            .import_package(&node.directory, &self.fetched, side_effects_key.as_deref())
            .await
            .map_err(|err| match err {
                Error::Storage(_) => err,
                other => StorageError::ImportFailed {
                    package: node.dep_path.to_string(),
                    path: node.directory.display().to_string(),
                    message: other.to_string(),
                }
                .into(),
            })?;
        Ok(ImportedNode {
            is_built: outcome.is_built,
            requires_build,
        })
    }
}

/// Build the graph of a lockfile without checks or store access
///
/// Used for the previous install's state. Unresolvable references are
/// dropped instead of failing.
#[must_use]
pub fn snapshot_graph(lockfile: &Lockfile, options: &GraphBuilderOptions) -> LockfileGraph {
    let options = GraphBuilderOptions {
        importers: options.importers.as_ref().map(|selected| {
            selected
                .iter()
                .filter(|id| lockfile.importers.contains_key(*id))
                .cloned()
                .collect()
        }),
        ..options.clone()
    };
    match plan_graph(lockfile, &options, None, false) {
        Ok((graph, _)) => graph,
        Err(_) => LockfileGraph::default(),
    }
}

type PlannedSkip = (DepPath, String, String, crate::Incompatibility);

fn plan_graph(
    lockfile: &Lockfile,
    options: &GraphBuilderOptions,
    checker: Option<&dyn InstallabilityChecker>,
    strict: bool,
) -> Result<(LockfileGraph, Vec<PlannedSkip>), Error> {
    let layout = &options.layout;
    let lockfile_dir = layout.lockfile_dir();
    let mut skipped: BTreeSet<DepPath> = options
        .skipped
        .iter()
        .filter(|dep_path| lockfile.packages.contains_key(*dep_path))
        .cloned()
        .collect();
    let mut skips = Vec::new();
    let mut graph = DependencyGraph::new();

    for (dep_path, snapshot) in &lockfile.packages {
        if skipped.contains(dep_path) {
            continue;
        }
        let Some((name, version)) = snapshot.name_and_version(dep_path) else {
            if strict {
                return Err(GraphError::InvalidDepPath {
                    dep_path: dep_path.to_string(),
                }
                .into());
            }
            continue;
        };

        if let Some(checker) = checker {
            let request = InstallabilityRequest {
                package_id: dep_path.as_str(),
                engines: &snapshot.engines,
                platform: &snapshot.platform,
            };
            if let Some(incompatibility) = checker.check(&request, &options.runtime) {
                if !snapshot.optional {
                    return Err(incompatible_error(dep_path, incompatibility));
                }
                tracing::debug!(%dep_path, reason = %incompatibility.reason, "skipping incompatible optional package");
                skipped.insert(dep_path.clone());
                skips.push((dep_path.clone(), name, version, incompatibility));
                continue;
            }
        }

        let patch = lockfile.patch_for(&name, &version).map(|patch| PatchInfo {
            path: lockfile_dir.join(&patch.path),
            hash: patch.hash.clone(),
            strict: patch.strict,
        });
        graph.insert(new_node(dep_path, snapshot, name, version, patch, layout));
    }

    let resolver = ReferenceResolver {
        graph: &graph,
        skipped: &skipped,
        lockfile_dir,
        strict,
    };

    let mut edges = Vec::new();
    for (dep_path, snapshot) in &lockfile.packages {
        if !graph.contains(dep_path) {
            continue;
        }
        for (alias, reference, optional) in snapshot.children() {
            let target =
                resolver.resolve(alias, reference, optional, lockfile_dir, dep_path.as_str())?;
            if let Some(target) = target {
                edges.push((dep_path.clone(), alias.to_string(), target));
            }
        }
    }

    let mut importers = BTreeMap::new();
    for id in options.selected_importers(lockfile) {
        let Some(project) = lockfile.importers.get(&id) else {
            return Err(GraphError::ImporterNotFound {
                importer: id.to_string(),
            }
            .into());
        };
        let dir = layout.importer_dir(&id);
        let mut direct = BTreeMap::new();
        for (alias, (reference, field)) in project.direct_dependencies(&options.include) {
            let optional = field == DependenciesField::OptionalDependencies;
            if let Some(target) =
                resolver.resolve(&alias, &reference, optional, &dir, id.as_str())?
            {
                direct.insert(alias, target);
            }
        }
        importers.insert(
            id.clone(),
            ImporterNode {
                modules_dir: layout.importer_modules_dir(&id),
                id,
                dir,
                direct,
            },
        );
    }

    for (parent, alias, target) in edges {
        let Some(node) = graph.get_mut(&parent) else {
            continue;
        };
        match target {
            DirectDependency::Package(child) => {
                node.children.insert(alias, child);
            }
            DirectDependency::External(path) => {
                node.external_children.insert(alias, path);
            }
        }
    }

    let mut planned = LockfileGraph {
        graph,
        importers,
        skipped,
        lockfile_packages: lockfile.packages.keys().cloned().collect(),
    };
    let reachable = planned.reachable();
    planned.graph.retain(&reachable);
    Ok((planned, skips))
}

fn new_node(
    dep_path: &DepPath,
    snapshot: &PackageSnapshot,
    name: String,
    version: String,
    patch: Option<PatchInfo>,
    layout: &VirtualStoreLayout,
) -> PackageNode {
    PackageNode {
        dep_path: dep_path.clone(),
        pkg_id_with_patch_hash: pkg_id_with_patch_hash(dep_path, patch.as_ref()),
        directory: layout.package_dir(dep_path, &name),
        modules_dir: layout.package_modules_dir(dep_path),
        children: BTreeMap::new(),
        external_children: BTreeMap::new(),
        optional_dependency_aliases: snapshot.optional_dependencies.keys().cloned().collect(),
        optional: snapshot.optional,
        requires_build: snapshot.requires_build,
        has_bin: snapshot.has_bin,
        resolution: snapshot.resolution.clone(),
        is_built: false,
        patch,
        name,
        version,
    }
}

fn incompatible_error(dep_path: &DepPath, incompatibility: crate::Incompatibility) -> Error {
    let package = dep_path.to_string();
    let crate::Incompatibility {
        reason,
        wanted,
        current,
    } = incompatibility;
    match reason {
        SkipReason::UnsupportedEngine => GraphError::UnsupportedEngine {
            package,
            wanted,
            current,
        },
        SkipReason::UnsupportedPlatform | SkipReason::BuildFailure => {
            GraphError::UnsupportedPlatform {
                package,
                wanted,
                current,
            }
        }
    }
    .into()
}

struct ReferenceResolver<'a> {
    graph: &'a DependencyGraph,
    skipped: &'a BTreeSet<DepPath>,
    lockfile_dir: &'a Path,
    strict: bool,
}

impl ReferenceResolver<'_> {
    /// Resolve one dependency reference
    ///
    /// `link:` paths are relative to `base_dir`; `file:` paths not in the
    /// graph are relative to the lockfile directory.
    fn resolve(
        &self,
        alias: &str,
        reference: &str,
        optional: bool,
        base_dir: &Path,
        required_by: &str,
    ) -> Result<Option<DirectDependency>, Error> {
        if let Some(path) = reference.strip_prefix("link:") {
            return Ok(Some(DirectDependency::External(normalize(
                &base_dir.join(path),
            ))));
        }
        let Some(dep_path) = DepPath::from_reference(alias, reference) else {
            return Ok(None);
        };
        if self.graph.contains(&dep_path) {
            return Ok(Some(DirectDependency::Package(dep_path)));
        }
        if let Some(path) = reference.strip_prefix("file:") {
            return Ok(Some(DirectDependency::External(normalize(
                &self.lockfile_dir.join(path),
            ))));
        }
        if optional || self.skipped.contains(&dep_path) || !self.strict {
            tracing::debug!(%dep_path, required_by, "dropping unresolved dependency");
            return Ok(None);
        }
        Err(GraphError::MissingDependency {
            dep_path: dep_path.to_string(),
            required_by: required_by.to_string(),
        }
        .into())
    }
}

fn normalize(path: &Path) -> PathBuf {
    nmx_root::normalize(path)
}

/// Remove nodes and everything only they kept reachable
fn drop_nodes(graph: &mut LockfileGraph, dropped: &[DepPath]) {
    for dep_path in dropped {
        graph.graph.remove(dep_path);
        graph.skipped.insert(dep_path.clone());
    }
    for importer in graph.importers.values_mut() {
        importer.direct.retain(|_, target| match target {
            DirectDependency::Package(dep_path) => !dropped.contains(dep_path),
            DirectDependency::External(_) => true,
        });
    }
    let reachable = graph.reachable();
    graph.graph.retain(&reachable);
}
