//! Orphan detection and removal

use futures::future::join_all;
use nmx_config::InstallConfig;
use nmx_errors::{Error, InstallError, StorageError};
use nmx_events::{AppEvent, EventEmitter, EventSender, PruneEvent};
use nmx_graph::{
    DirectDependency, LockfileGraph, PackageStore, VirtualStoreLayout, CURRENT_LOCKFILE,
    PRIVATE_HOIST_DIR,
};
use nmx_hoist::{hoist_dir, HoistedAliasAssignment, BIN_DIR};
use nmx_resources::{acquire_semaphore_permit, ResourceManager};
use nmx_types::{DepPath, HoistKind, ProjectId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// What a prune run covers
#[derive(Debug, Clone, Default)]
pub struct PruneOptions {
    /// Importers being reinstalled
    pub importers: Vec<ProjectId>,
    /// Also remove unknown entries found in importer modules directories
    pub prune_direct_dependencies: bool,
    /// Drop importer links that resolve exactly like the root importer's
    pub dedupe_direct_deps: bool,
    /// Remove virtual store entries no lockfile package refers to
    pub prune_virtual_store: bool,
    /// Ask the package store to drop content no install refers to
    pub prune_store: bool,
    pub dry_run: bool,
}

impl PruneOptions {
    #[must_use]
    pub fn from_config(config: &InstallConfig, importers: Vec<ProjectId>) -> Self {
        Self {
            importers,
            prune_direct_dependencies: config.prune_direct_dependencies,
            dedupe_direct_deps: config.dedupe_direct_deps,
            prune_virtual_store: config.prune_virtual_store,
            prune_store: config.prune_store,
            dry_run: config.dry_run,
        }
    }
}

/// Everything a prune run found, and what it managed to remove
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneResult {
    /// Orphaned packages with the locations to remove for each:
    /// the virtual store entry followed by hoisted symlinks
    pub orphans: BTreeMap<DepPath, Vec<PathBuf>>,
    /// Importer dependency links that no longer apply
    pub direct_links: Vec<PathBuf>,
    /// Command links pointing into orphaned packages
    pub bin_links: Vec<PathBuf>,
    /// Virtual store entries no lockfile package refers to
    pub unreferenced: Vec<PathBuf>,
    /// Paths actually removed; empty on a dry run
    pub removed: Vec<PathBuf>,
    /// Paths whose removal failed
    pub failed: Vec<PathBuf>,
}

impl PruneResult {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orphans.is_empty()
            && self.direct_links.is_empty()
            && self.bin_links.is_empty()
            && self.unreferenced.is_empty()
    }

    /// Dependency paths of the orphaned packages
    pub fn orphan_dep_paths(&self) -> impl Iterator<Item = &DepPath> {
        self.orphans.keys()
    }

    /// Links to remove, in removal order
    fn links(&self) -> Vec<PathBuf> {
        let mut links = self.direct_links.clone();
        links.extend(
            self.orphans
                .values()
                .flat_map(|paths| paths.iter().skip(1).cloned()),
        );
        links.extend(self.bin_links.iter().cloned());
        links
    }

    /// Virtual store directories to remove
    fn directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .orphans
            .values()
            .filter_map(|paths| paths.first().cloned())
            .collect();
        dirs.extend(self.unreferenced.iter().cloned());
        dirs
    }
}

/// Removes installation state the target graph no longer needs
pub struct Pruner {
    resources: ResourceManager,
    store: Option<Arc<dyn PackageStore>>,
    tx: Option<EventSender>,
}

impl EventEmitter for Pruner {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

impl Pruner {
    #[must_use]
    pub fn new(resources: ResourceManager) -> Self {
        Self {
            resources,
            store: None,
            tx: None,
        }
    }

    #[must_use]
    pub fn with_event_sender(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Store to prune after orphans are removed, when `prune_store` is set
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn PackageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Work out what is stale without touching the filesystem
    ///
    /// `previous` is the graph of what is installed, `current` the graph
    /// about to be installed and `previous_hoisted` the aliases the last
    /// run hoisted.
    ///
    /// # Errors
    ///
    /// Returns an error if an importer modules directory or the virtual
    /// store exists but cannot be listed.
    pub async fn plan(
        &self,
        previous: &LockfileGraph,
        current: &LockfileGraph,
        previous_hoisted: &HoistedAliasAssignment,
        layout: &VirtualStoreLayout,
        options: &PruneOptions,
    ) -> Result<PruneResult, Error> {
        let mut result = PruneResult {
            direct_links: stale_direct_links(previous, current, previous_hoisted, options).await?,
            ..PruneResult::default()
        };

        let orphans = find_orphans(previous, current, &options.importers);
        let mut orphan_dirs = BTreeSet::new();
        for dep_path in &orphans {
            let entry_dir = layout.package_entry_dir(dep_path);
            let mut paths = vec![entry_dir.clone()];
            paths.extend(stale_hoisted_links(dep_path, &orphans, previous_hoisted, layout).await);
            orphan_dirs.insert(entry_dir);
            result.orphans.insert(dep_path.clone(), paths);
        }

        result.bin_links = bin_links_into(&orphan_dirs, previous, layout, options).await;

        if options.prune_virtual_store {
            result.unreferenced = unreferenced_entries(current, layout)
                .await?
                .into_iter()
                .filter(|dir| !orphan_dirs.contains(dir))
                .collect();
        }
        Ok(result)
    }

    /// Plan and, unless this is a dry run, remove everything stale
    ///
    /// Links are removed before virtual store directories. Removal is
    /// best-effort: a path that cannot be removed is reported and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if planning fails or a removal task cannot be
    /// scheduled.
    pub async fn prune(
        &self,
        previous: &LockfileGraph,
        current: &LockfileGraph,
        previous_hoisted: &HoistedAliasAssignment,
        layout: &VirtualStoreLayout,
        options: &PruneOptions,
    ) -> Result<PruneResult, Error> {
        let mut result = self
            .plan(previous, current, previous_hoisted, layout, options)
            .await?;

        if !result.orphans.is_empty() {
            self.emit(AppEvent::Prune(PruneEvent::OrphansFound {
                dep_paths: result.orphans.keys().cloned().collect(),
            }));
        }
        if options.dry_run {
            self.emit_debug(format!(
                "dry run: {} orphaned packages, {} stale links left in place",
                result.orphans.len(),
                result.links().len()
            ));
            return Ok(result);
        }

        let (links_removed, links_failed) = self.remove_all(result.links()).await?;
        let (dirs_removed, dirs_failed) = self.remove_all(result.directories()).await?;

        if options.prune_store && !dirs_removed.is_empty() {
            if let Some(store) = &self.store {
                if let Err(e) = store.prune().await {
                    self.emit_warning(format!("package store prune failed: {e}"));
                }
            }
        }

        self.emit(AppEvent::Prune(PruneEvent::Completed {
            removed_packages: dirs_removed.len(),
            removed_links: links_removed.len(),
        }));

        result.removed = links_removed;
        result.removed.extend(dirs_removed);
        result.failed = links_failed;
        result.failed.extend(dirs_failed);
        Ok(result)
    }

    /// Remove every symlink a previous hoisting pass created
    ///
    /// Used when the hoist patterns changed: the old assignment no longer
    /// says anything about what should be visible. Only symlinks into the
    /// virtual store are touched. Returns the removed paths.
    ///
    /// # Errors
    ///
    /// Returns an error if a removal task cannot be scheduled.
    pub async fn remove_hoisted_links(
        &self,
        assignment: &HoistedAliasAssignment,
        layout: &VirtualStoreLayout,
    ) -> Result<Vec<PathBuf>, Error> {
        let mut links = BTreeSet::new();
        for (_, alias, kind) in assignment.entries() {
            let link = hoist_dir(layout, kind).join(alias);
            if is_managed_link(&link, layout.virtual_store_dir()).await {
                links.insert(link);
            }
        }
        let (removed, _) = self.remove_all(links.into_iter().collect()).await?;
        Ok(removed)
    }

    async fn remove_all(&self, paths: Vec<PathBuf>) -> Result<(Vec<PathBuf>, Vec<PathBuf>), Error> {
        let semaphore = self.resources.link_semaphore();
        let mut handles = Vec::with_capacity(paths.len());
        for path in paths {
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = acquire_semaphore_permit(semaphore, "prune removal").await?;
                let removed = nmx_root::remove_path(&path).await;
                Ok::<_, Error>((path, removed))
            }));
        }

        let mut removed = Vec::new();
        let mut failed = Vec::new();
        let mut first_error = None;
        for joined in join_all(handles).await {
            let result = joined.unwrap_or_else(|e| {
                Err(InstallError::TaskError {
                    message: format!("prune task failed: {e}"),
                }
                .into())
            });
            match result {
                Ok((path, Ok(true))) => {
                    self.emit(AppEvent::Prune(PruneEvent::PathRemoved { path: path.clone() }));
                    removed.push(path);
                }
                Ok((path, Ok(false))) => {
                    tracing::debug!(path = %path.display(), "already gone");
                }
                Ok((path, Err(e))) => {
                    self.emit(AppEvent::Prune(PruneEvent::RemovalFailed {
                        path: path.clone(),
                        message: e.to_string(),
                    }));
                    failed.push(path);
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        removed.sort();
        failed.sort();
        Ok((removed, failed))
    }
}

/// Packages the previous install reached from the reinstalled importers
/// that nothing will need afterwards
///
/// Packages still reachable from importers outside this run are kept.
#[must_use]
pub fn find_orphans(
    previous: &LockfileGraph,
    current: &LockfileGraph,
    importers: &[ProjectId],
) -> BTreeSet<DepPath> {
    let selected: BTreeSet<&ProjectId> = importers.iter().collect();
    let others: Vec<ProjectId> = previous
        .importers
        .keys()
        .filter(|id| !selected.contains(id))
        .cloned()
        .collect();
    let kept_elsewhere = previous.reachable_from_importers(&others);

    previous
        .reachable_from_importers(importers)
        .into_iter()
        .filter(|dep_path| !current.graph.contains(dep_path) && !kept_elsewhere.contains(dep_path))
        .collect()
}

async fn stale_direct_links(
    previous: &LockfileGraph,
    current: &LockfileGraph,
    previous_hoisted: &HoistedAliasAssignment,
    options: &PruneOptions,
) -> Result<Vec<PathBuf>, Error> {
    let no_direct = BTreeMap::new();
    let publicly_hoisted = previous_hoisted.aliases(HoistKind::Public);
    let mut links = BTreeSet::new();

    for id in &options.importers {
        let wanted = current.importers.get(id).map_or(&no_direct, |importer| &importer.direct);
        let deduped = if options.dedupe_direct_deps {
            current.deduped_direct_aliases(id)
        } else {
            BTreeSet::new()
        };

        if let Some(importer) = previous.importers.get(id) {
            for (alias, target) in &importer.direct {
                if is_stale(alias, target, wanted, &deduped) {
                    links.insert(importer.modules_dir.join(alias));
                }
            }
        }

        if options.prune_direct_dependencies {
            let Some(modules_dir) = current
                .importers
                .get(id)
                .or_else(|| previous.importers.get(id))
                .map(|importer| importer.modules_dir.clone())
            else {
                continue;
            };
            for alias in nmx_root::read_modules_dir(&modules_dir).await? {
                let keep = (wanted.contains_key(&alias) && !deduped.contains(&alias))
                    || (id.is_root() && publicly_hoisted.contains(&alias));
                if !keep {
                    links.insert(modules_dir.join(alias));
                }
            }
        }
    }
    Ok(links.into_iter().collect())
}

fn is_stale(
    alias: &str,
    target: &DirectDependency,
    wanted: &BTreeMap<String, DirectDependency>,
    deduped: &BTreeSet<String>,
) -> bool {
    wanted.get(alias) != Some(target) || deduped.contains(alias)
}

/// Hoisted links of an orphan no surviving package claims
async fn stale_hoisted_links(
    orphan: &DepPath,
    orphans: &BTreeSet<DepPath>,
    previous_hoisted: &HoistedAliasAssignment,
    layout: &VirtualStoreLayout,
) -> Vec<PathBuf> {
    let Some(aliases) = previous_hoisted.get(orphan) else {
        return Vec::new();
    };

    let mut surviving: BTreeSet<(HoistKind, &str)> = BTreeSet::new();
    for (dep_path, alias, kind) in previous_hoisted.entries() {
        if !orphans.contains(dep_path) {
            surviving.insert((kind, alias));
        }
    }

    let mut links = Vec::new();
    for (alias, &kind) in aliases {
        if surviving.contains(&(kind, alias.as_str())) {
            continue;
        }
        let link = hoist_dir(layout, kind).join(alias);
        if is_managed_link(&link, layout.virtual_store_dir()).await {
            links.push(link);
        }
    }
    links
}

/// Command links in any `.bin` this run looks after that resolve into an
/// orphaned virtual store entry
async fn bin_links_into(
    orphan_dirs: &BTreeSet<PathBuf>,
    previous: &LockfileGraph,
    layout: &VirtualStoreLayout,
    options: &PruneOptions,
) -> Vec<PathBuf> {
    if orphan_dirs.is_empty() {
        return Vec::new();
    }

    let mut bin_dirs = BTreeSet::new();
    bin_dirs.insert(layout.public_hoist_dir().join(BIN_DIR));
    bin_dirs.insert(layout.private_hoist_dir().join(BIN_DIR));
    for id in &options.importers {
        if let Some(importer) = previous.importers.get(id) {
            bin_dirs.insert(importer.modules_dir.join(BIN_DIR));
        }
    }

    let mut links = Vec::new();
    for bin_dir in bin_dirs {
        let Ok(mut entries) = fs::read_dir(&bin_dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let Some(target) = nmx_root::read_link_target(&path).await else {
                continue;
            };
            if orphan_dirs.iter().any(|dir| target.starts_with(dir)) {
                links.push(path);
            }
        }
    }
    links.sort();
    links
}

/// Virtual store entries that no package of the target lockfile maps to
async fn unreferenced_entries(
    current: &LockfileGraph,
    layout: &VirtualStoreLayout,
) -> Result<Vec<PathBuf>, Error> {
    let virtual_store = layout.virtual_store_dir();
    let mut entries = match fs::read_dir(virtual_store).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::from_io_with_path(&e, virtual_store).into()),
    };

    let referenced: BTreeSet<String> = current
        .lockfile_packages
        .iter()
        .chain(current.graph.dep_paths())
        .map(|dep_path| layout.filename(dep_path))
        .collect();

    let mut unreferenced = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::from_io_with_path(&e, virtual_store))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.')
            || name == PRIVATE_HOIST_DIR
            || name == CURRENT_LOCKFILE
            || referenced.contains(&name)
        {
            continue;
        }
        unreferenced.push(entry.path());
    }
    unreferenced.sort();
    Ok(unreferenced)
}

/// Whether `link` is a symlink this tool created into the virtual store
async fn is_managed_link(link: &Path, virtual_store: &Path) -> bool {
    nmx_root::read_link_target(link)
        .await
        .is_some_and(|target| target.starts_with(virtual_store))
}
