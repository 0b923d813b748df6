use nmx_events::EventSender;
use nmx_types::ProjectId;

/// Per-run install settings layered over the configuration
#[derive(Clone, Debug)]
pub struct InstallContext {
    /// Importers to install; empty selects every importer of the lockfile
    pub importers: Vec<ProjectId>,
    /// Install incompatible packages and ignore recorded skips
    pub force: bool,
    /// Do not run lifecycle scripts
    pub ignore_scripts: bool,
    /// Report what would be pruned and stop before changing anything
    pub dry_run: bool,

    /// Event sender for progress reporting
    pub event_sender: Option<EventSender>,
}

context_builder! {
    InstallContext {
        importers: Vec<ProjectId>,
        force: bool,
        ignore_scripts: bool,
        dry_run: bool,
    }
}

impl InstallContext {
    /// Add an importer to the selection
    #[must_use]
    pub fn add_importer(mut self, importer: impl Into<ProjectId>) -> Self {
        self.importers.push(importer.into());
        self
    }
}
