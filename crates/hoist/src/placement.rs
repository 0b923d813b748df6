//! Symlink placement for hoisted aliases

use crate::hoister::HoistedAliasAssignment;
use futures::future::join_all;
use nmx_errors::{Error, InstallError, StorageError};
use nmx_events::{AppEvent, EventEmitter, EventSender, HoistEvent};
use nmx_graph::{LockfileGraph, VirtualStoreLayout};
use nmx_resources::{acquire_semaphore_permit, ResourceManager};
use nmx_root::EntryKind;
use nmx_types::HoistKind;
use std::path::{Path, PathBuf};

/// Directory a visibility tier links into
#[must_use]
pub fn hoist_dir(layout: &VirtualStoreLayout, kind: HoistKind) -> PathBuf {
    match kind {
        HoistKind::Public => layout.public_hoist_dir(),
        HoistKind::Private => layout.private_hoist_dir(),
    }
}

/// What placement did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementReport {
    pub public: Vec<PathBuf>,
    pub private: Vec<PathBuf>,
    /// Locations left alone because something unmanaged occupies them
    pub skipped: Vec<PathBuf>,
}

enum Placement {
    Linked(HoistKind, PathBuf),
    Skipped(PathBuf),
}

/// Creates hoisted symlinks under the link concurrency bound
pub struct HoistLinker {
    resources: ResourceManager,
    tx: Option<EventSender>,
}

impl EventEmitter for HoistLinker {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

impl HoistLinker {
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

    /// Link every assigned alias into its hoist directory
    ///
    /// Existing managed symlinks are replaced. Real directories, files and
    /// symlinks pointing outside the virtual store are left untouched.
    /// Assignments for packages absent from the graph are ignored.
    ///
    /// # Errors
    ///
    /// Returns the first link failure after all placements have settled.
    pub async fn place(
        &self,
        graph: &LockfileGraph,
        assignment: &HoistedAliasAssignment,
        layout: &VirtualStoreLayout,
    ) -> Result<PlacementReport, Error> {
        let semaphore = self.resources.link_semaphore();
        let virtual_store = layout.virtual_store_dir().to_path_buf();

        let mut handles = Vec::new();
        for (dep_path, alias, kind) in assignment.entries() {
            let Some(node) = graph.graph.get(dep_path) else {
                continue;
            };
            let target = node.directory.clone();
            let link = hoist_dir(layout, kind).join(alias);
            let virtual_store = virtual_store.clone();
            let semaphore = semaphore.clone();
            let alias = alias.to_string();
            handles.push(tokio::spawn(async move {
                let _permit = acquire_semaphore_permit(semaphore, "hoist link").await?;
                let placement = place_link(&target, &link, &virtual_store, kind).await?;
                Ok::<_, Error>((alias, target, placement))
            }));
        }

        let mut report = PlacementReport::default();
        let mut first_error = None;
        for joined in join_all(handles).await {
            let result = joined.unwrap_or_else(|e| {
                Err(InstallError::TaskError {
                    message: format!("hoist link task failed: {e}"),
                }
                .into())
            });
            match result {
                Ok((alias, target, Placement::Linked(kind, link))) => {
                    self.emit(AppEvent::Hoist(HoistEvent::AliasHoisted {
                        alias,
                        kind,
                        target,
                    }));
                    match kind {
                        HoistKind::Public => report.public.push(link),
                        HoistKind::Private => report.private.push(link),
                    }
                }
                Ok((alias, _, Placement::Skipped(path))) => {
                    self.emit(AppEvent::Hoist(HoistEvent::PlacementSkipped {
                        alias,
                        path: path.clone(),
                    }));
                    report.skipped.push(path);
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

        report.public.sort();
        report.private.sort();
        report.skipped.sort();
        self.emit(AppEvent::Hoist(HoistEvent::Completed {
            public: report.public.len(),
            private: report.private.len(),
        }));
        Ok(report)
    }
}

async fn place_link(
    target: &Path,
    link: &Path,
    virtual_store: &Path,
    kind: HoistKind,
) -> Result<Placement, Error> {
    match nmx_root::entry_kind(link).await {
        EntryKind::Missing => match nmx_root::symlink_dir(target, link).await {
            Ok(()) => Ok(Placement::Linked(kind, link.to_path_buf())),
            Err(Error::Storage(StorageError::AlreadyExists { .. })) => {
                tracing::debug!(link = %link.display(), "hoist location taken concurrently");
                Ok(Placement::Skipped(link.to_path_buf()))
            }
            Err(e) => Err(e),
        },
        EntryKind::Symlink => match nmx_root::read_link_target(link).await {
            Some(existing) if existing == target => Ok(Placement::Linked(kind, link.to_path_buf())),
            Some(existing) if existing.starts_with(virtual_store) => {
                nmx_root::force_symlink_dir(target, link).await?;
                Ok(Placement::Linked(kind, link.to_path_buf()))
            }
            existing => {
                tracing::debug!(
                    link = %link.display(),
                    existing = ?existing,
                    "skipping hoist over a symlink not managed by the virtual store"
                );
                Ok(Placement::Skipped(link.to_path_buf()))
            }
        },
        EntryKind::Directory | EntryKind::File => {
            tracing::debug!(link = %link.display(), "skipping hoist over an existing entry");
            Ok(Placement::Skipped(link.to_path_buf()))
        }
    }
}
