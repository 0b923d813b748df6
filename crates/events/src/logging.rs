//! Structured logging integration for events
//!
//! Converts domain events into `tracing` records with structured fields so
//! that a subscriber installed by the embedding application sees the same
//! information as an event consumer.

use crate::{
    AppEvent, BuildEvent, EventMessage, GeneralEvent, GraphEvent, HoistEvent, PruneEvent,
};
use tracing::{debug, error, info, warn};

/// Log an event using the tracing infrastructure with structured fields
#[allow(clippy::too_many_lines)]
pub fn log_event(message: &EventMessage) {
    let meta = &message.meta;
    match &message.event {
        AppEvent::General(event) => match event {
            GeneralEvent::Warning { message, context } => {
                warn!(
                    target: "nmx::events::general",
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    context = ?context,
                    "{message}"
                );
            }
            GeneralEvent::Error { message, details } => {
                error!(
                    target: "nmx::events::general",
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    details = ?details,
                    "{message}"
                );
            }
            GeneralEvent::DebugLog { message, context } => {
                debug!(
                    target: "nmx::events::general",
                    source = meta.source.as_str(),
                    event_id = %meta.event_id,
                    context = ?context,
                    "{message}"
                );
            }
            GeneralEvent::OperationStarted { operation } => {
                info!(
                    target: "nmx::events::general",
                    event_id = %meta.event_id,
                    operation = %operation,
                    "Operation started"
                );
            }
            GeneralEvent::OperationCompleted { operation, success } => {
                info!(
                    target: "nmx::events::general",
                    event_id = %meta.event_id,
                    operation = %operation,
                    success = success,
                    "Operation completed"
                );
            }
            GeneralEvent::OperationFailed { operation, error } => {
                error!(
                    target: "nmx::events::general",
                    event_id = %meta.event_id,
                    operation = %operation,
                    error = %error,
                    "Operation failed"
                );
            }
        },

        AppEvent::Graph(event) => match event {
            GraphEvent::PackageSkipped {
                dep_path,
                name,
                version,
                reason,
                details,
            } => {
                info!(
                    target: "nmx::events::graph",
                    event_id = %meta.event_id,
                    dep_path = %dep_path,
                    package = %name,
                    version = %version,
                    reason = %reason,
                    details = %details,
                    "Skipping optional dependency"
                );
            }
            GraphEvent::PackageAdded { dep_path } => {
                info!(
                    target: "nmx::events::graph",
                    event_id = %meta.event_id,
                    dep_path = %dep_path,
                    "Package added"
                );
            }
            GraphEvent::PackageReused { dep_path } => {
                debug!(
                    target: "nmx::events::graph",
                    event_id = %meta.event_id,
                    dep_path = %dep_path,
                    "Package reused"
                );
            }
            GraphEvent::Built {
                nodes,
                importers,
                skipped,
            } => {
                info!(
                    target: "nmx::events::graph",
                    event_id = %meta.event_id,
                    nodes = nodes,
                    importers = importers,
                    skipped = skipped,
                    "Dependency graph built"
                );
            }
        },

        AppEvent::Hoist(event) => match event {
            HoistEvent::AliasHoisted {
                alias,
                kind,
                target,
            } => {
                debug!(
                    target: "nmx::events::hoist",
                    alias = %alias,
                    kind = %kind,
                    link_target = %target.display(),
                    "Alias hoisted"
                );
            }
            HoistEvent::PlacementSkipped { alias, path } => {
                debug!(
                    target: "nmx::events::hoist",
                    alias = %alias,
                    path = %path.display(),
                    "Hoist placement skipped"
                );
            }
            HoistEvent::BinLinked { command, target } => {
                debug!(
                    target: "nmx::events::hoist",
                    command = %command,
                    link_target = %target.display(),
                    "Bin linked"
                );
            }
            HoistEvent::Completed { public, private } => {
                info!(
                    target: "nmx::events::hoist",
                    event_id = %meta.event_id,
                    public = public,
                    private = private,
                    "Hoisting completed"
                );
            }
        },

        AppEvent::Build(event) => match event {
            BuildEvent::ChunkStarted { index, packages } => {
                info!(
                    target: "nmx::events::build",
                    event_id = %meta.event_id,
                    chunk = index,
                    packages = packages.len(),
                    "Build chunk started"
                );
            }
            BuildEvent::PackageStarted { dep_path, stage } => {
                info!(
                    target: "nmx::events::build",
                    correlation = ?meta.correlation_id,
                    dep_path = %dep_path,
                    stage = %stage,
                    "Running lifecycle script"
                );
            }
            BuildEvent::PackageBuilt {
                dep_path,
                duration_ms,
            } => {
                info!(
                    target: "nmx::events::build",
                    correlation = ?meta.correlation_id,
                    dep_path = %dep_path,
                    duration_ms = duration_ms,
                    "Package built"
                );
            }
            BuildEvent::OutputLinked { dep_path, location } => {
                debug!(
                    target: "nmx::events::build",
                    dep_path = %dep_path,
                    location = %location,
                    "Build output linked"
                );
            }
            BuildEvent::Failed { dep_path, failure } => {
                error!(
                    target: "nmx::events::build",
                    event_id = %meta.event_id,
                    dep_path = %dep_path,
                    retryable = failure.retryable,
                    code = ?failure.code,
                    message = %failure.message,
                    hint = ?failure.hint,
                    "Build failed"
                );
            }
            BuildEvent::OptionalSkipped {
                dep_path,
                name,
                version,
                reason,
                failure,
            } => {
                warn!(
                    target: "nmx::events::build",
                    event_id = %meta.event_id,
                    dep_path = %dep_path,
                    package = %name,
                    version = %version,
                    reason = %reason,
                    message = %failure.message,
                    "Skipping failed optional dependency"
                );
            }
            BuildEvent::IgnoredBuilds { names } => {
                info!(
                    target: "nmx::events::build",
                    event_id = %meta.event_id,
                    packages = ?names,
                    "Ignored build scripts"
                );
            }
            BuildEvent::SideEffectsCached {
                dep_path,
                state_key,
            } => {
                info!(
                    target: "nmx::events::build",
                    dep_path = %dep_path,
                    state_key = %state_key,
                    "Side effects cached"
                );
            }
            BuildEvent::PatchSkipped { dep_path, failure } => {
                warn!(
                    target: "nmx::events::build",
                    dep_path = %dep_path,
                    message = %failure.message,
                    "Patch not applied"
                );
            }
        },

        AppEvent::Prune(event) => match event {
            PruneEvent::OrphansFound { dep_paths } => {
                info!(
                    target: "nmx::events::prune",
                    event_id = %meta.event_id,
                    count = dep_paths.len(),
                    "Orphaned packages found"
                );
            }
            PruneEvent::PathRemoved { path } => {
                debug!(
                    target: "nmx::events::prune",
                    path = %path.display(),
                    "Removed"
                );
            }
            PruneEvent::RemovalFailed { path, message } => {
                warn!(
                    target: "nmx::events::prune",
                    path = %path.display(),
                    error = %message,
                    "Removal failed"
                );
            }
            PruneEvent::Completed {
                removed_packages,
                removed_links,
            } => {
                info!(
                    target: "nmx::events::prune",
                    event_id = %meta.event_id,
                    removed_packages = removed_packages,
                    removed_links = removed_links,
                    "Pruning completed"
                );
            }
        },
    }
}
