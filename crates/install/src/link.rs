//! Dependency symlinks
//!
//! Every package sees its dependencies as siblings inside its virtual
//! store `node_modules`; every importer sees its direct dependencies in
//! its own `node_modules`.

use futures::future::join_all;
use nmx_errors::{Error, InstallError};
use nmx_events::{EventEmitter, EventSender};
use nmx_graph::{DirectDependency, LockfileGraph};
use nmx_hoist::{BinLinker, BinSource, BIN_DIR};
use nmx_resources::{acquire_semaphore_permit, ResourceManager};
use nmx_types::{DepPath, ProjectId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// A symlink to create: link path to (alias, target)
type PlannedLinks = BTreeMap<PathBuf, (String, PathBuf)>;

/// Links packages to their dependencies and importers to theirs
pub struct DependencyLinker {
    resources: ResourceManager,
    tx: Option<EventSender>,
}

impl EventEmitter for DependencyLinker {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

impl DependencyLinker {
    #[must_use]
    pub fn new(resources: ResourceManager) -> Self {
        Self {
            resources,
            tx: None,
        }
    }

    #[must_use]
    pub fn with_event_sender(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    fn bin_linker(&self) -> BinLinker {
        let linker = BinLinker::new(self.resources.clone());
        match &self.tx {
            Some(tx) => linker.with_event_sender(tx.clone()),
            None => linker,
        }
    }

    /// Link the children of the given packages next to them
    ///
    /// Packages that run lifecycle scripts also get their children's
    /// executables in `node_modules/.bin`, where scripts look for them.
    /// Returns the number of dependency links in place.
    ///
    /// # Errors
    ///
    /// Returns the first link failure after all links have settled.
    pub async fn link_packages(
        &self,
        graph: &LockfileGraph,
        dep_paths: &[DepPath],
    ) -> Result<usize, Error> {
        let mut planned = PlannedLinks::new();
        let mut bin_sources = Vec::new();
        for dep_path in dep_paths {
            let Some(node) = graph.graph.get(dep_path) else {
                continue;
            };
            for (alias, child) in &node.children {
                let Some(child_node) = graph.graph.get(child) else {
                    continue;
                };
                let link = node.modules_dir.join(alias);
                if link == node.directory {
                    continue;
                }
                planned.insert(link, (alias.clone(), child_node.directory.clone()));
                if node.requires_build && child_node.has_bin {
                    bin_sources.push(BinSource {
                        package_dir: child_node.directory.clone(),
                        bin_dir: node.modules_dir.join(BIN_DIR),
                    });
                }
            }
            for (alias, target) in &node.external_children {
                planned.insert(node.modules_dir.join(alias), (alias.clone(), target.clone()));
            }
        }

        let linked = self.link_all(planned).await?;
        self.bin_linker().link(&bin_sources).await?;
        Ok(linked.len())
    }

    /// Link the direct dependencies of importers and their executables
    ///
    /// With `dedupe`, aliases a non-root importer shares with the root
    /// importer are not linked; they resolve through the root
    /// `node_modules`. Returns the created importer links.
    ///
    /// # Errors
    ///
    /// Returns the first link failure after all links have settled.
    pub async fn link_importers(
        &self,
        graph: &LockfileGraph,
        importers: &[ProjectId],
        dedupe: bool,
    ) -> Result<Vec<PathBuf>, Error> {
        let mut planned = PlannedLinks::new();
        let mut bin_sources = Vec::new();
        for id in importers {
            let Some(importer) = graph.importers.get(id) else {
                continue;
            };
            let deduped = if dedupe {
                graph.deduped_direct_aliases(id)
            } else {
                BTreeSet::new()
            };
            let bin_dir = importer.modules_dir.join(BIN_DIR);
            for (alias, target) in &importer.direct {
                if deduped.contains(alias) {
                    continue;
                }
                let (directory, has_bin) = match target {
                    DirectDependency::Package(dep_path) => {
                        let Some(node) = graph.graph.get(dep_path) else {
                            continue;
                        };
                        (node.directory.clone(), node.has_bin)
                    }
                    // External packages are not in the lockfile; their manifest decides
                    DirectDependency::External(path) => (path.clone(), true),
                };
                if has_bin {
                    bin_sources.push(BinSource {
                        package_dir: directory.clone(),
                        bin_dir: bin_dir.clone(),
                    });
                }
                planned.insert(importer.modules_dir.join(alias), (alias.clone(), directory));
            }
        }

        let linked = self.link_all(planned).await?;
        self.bin_linker().link(&bin_sources).await?;
        Ok(linked)
    }

    async fn link_all(&self, planned: PlannedLinks) -> Result<Vec<PathBuf>, Error> {
        let semaphore = self.resources.link_semaphore();
        let mut handles = Vec::with_capacity(planned.len());
        for (link, (alias, target)) in planned {
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = acquire_semaphore_permit(semaphore, "dependency link").await?;
                nmx_root::force_symlink_dir(&target, &link)
                    .await
                    .map_err(|e| -> Error {
                        InstallError::LinkFailed {
                            alias,
                            path: link.display().to_string(),
                            message: e.to_string(),
                        }
                        .into()
                    })?;
                Ok::<_, Error>(link)
            }));
        }

        let mut linked = Vec::new();
        let mut first_error = None;
        for joined in join_all(handles).await {
            let result = joined.unwrap_or_else(|e| {
                Err(InstallError::TaskError {
                    message: format!("link task failed: {e}"),
                }
                .into())
            });
            match result {
                Ok(link) => linked.push(link),
                Err(e) => {
                    self.emit_warning(format!("linking failed: {e}"));
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }
        linked.sort();
        Ok(linked)
    }
}
