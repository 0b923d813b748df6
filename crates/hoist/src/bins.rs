//! Executable linking into `.bin` directories

use futures::future::join_all;
use nmx_errors::{Error, InstallError};
use nmx_events::{AppEvent, EventEmitter, EventSender, HoistEvent};
use nmx_graph::{LockfileGraph, VirtualStoreLayout};
use nmx_resources::{acquire_semaphore_permit, ResourceManager};
use nmx_types::PackageManifest;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::hoister::HoistedBin;
use crate::placement::hoist_dir;

/// Name of the executables directory inside a modules directory
pub const BIN_DIR: &str = ".bin";

/// A package whose executables should appear in `bin_dir`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinSource {
    pub package_dir: PathBuf,
    pub bin_dir: PathBuf,
}

/// Bin sources for hoisted aliases
#[must_use]
pub fn hoisted_bin_sources(
    bins: &[HoistedBin],
    graph: &LockfileGraph,
    layout: &VirtualStoreLayout,
) -> Vec<BinSource> {
    bins.iter()
        .filter_map(|bin| {
            let node = graph.graph.get(&bin.dep_path)?;
            Some(BinSource {
                package_dir: node.directory.clone(),
                bin_dir: hoist_dir(layout, bin.kind).join(BIN_DIR),
            })
        })
        .collect()
}

/// Links package executables
pub struct BinLinker {
    resources: ResourceManager,
    tx: Option<EventSender>,
}

impl EventEmitter for BinLinker {
    fn event_sender(&self) -> Option<&EventSender> {
        self.tx.as_ref()
    }
}

impl BinLinker {
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

    /// Link the executables of every source, returning the created links
    ///
    /// When two sources declare the same command for one bin directory the
    /// earlier source wins. Packages without a manifest, and commands whose
    /// file is missing or outside the package, are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if a manifest is unreadable or a link cannot be
    /// created.
    pub async fn link(&self, sources: &[BinSource]) -> Result<Vec<PathBuf>, Error> {
        let manifests = join_all(
            sources
                .iter()
                .map(|source| PackageManifest::read(&source.package_dir)),
        )
        .await;

        let mut planned: BTreeMap<PathBuf, (String, PathBuf)> = BTreeMap::new();
        for (source, manifest) in sources.iter().zip(manifests) {
            let Some(manifest) = manifest? else {
                tracing::debug!(dir = %source.package_dir.display(), "no package.json, skipping bins");
                continue;
            };
            for (command, relative) in manifest.bin_commands() {
                let target = nmx_root::normalize(&source.package_dir.join(relative));
                if !target.starts_with(&source.package_dir) {
                    tracing::debug!(%command, "bin target escapes its package, skipping");
                    continue;
                }
                planned
                    .entry(source.bin_dir.join(&command))
                    .or_insert((command, target));
            }
        }

        let semaphore = self.resources.link_semaphore();
        let mut handles = Vec::with_capacity(planned.len());
        for (link, (command, target)) in planned {
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = acquire_semaphore_permit(semaphore, "bin link").await?;
                let linked = link_bin(&target, &link).await?;
                Ok::<_, Error>(linked.then_some((command, target, link)))
            }));
        }

        let mut linked = Vec::new();
        let mut first_error = None;
        for joined in join_all(handles).await {
            let result = joined.unwrap_or_else(|e| {
                Err(InstallError::TaskError {
                    message: format!("bin link task failed: {e}"),
                }
                .into())
            });
            match result {
                Ok(Some((command, target, link))) => {
                    self.emit(AppEvent::Hoist(HoistEvent::BinLinked { command, target }));
                    linked.push(link);
                }
                Ok(None) => {}
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(linked),
        }
    }
}

async fn link_bin(target: &Path, link: &Path) -> Result<bool, Error> {
    if !nmx_root::exists(target).await {
        tracing::debug!(target = %target.display(), "bin target missing, skipping");
        return Ok(false);
    }
    nmx_root::force_symlink_file(target, link).await?;
    nmx_root::make_executable(target).await?;
    Ok(true)
}
