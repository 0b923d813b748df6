use serde::{Deserialize, Serialize};

use crate::EventSource;
use nmx_errors::UserFacingError;

/// Structured failure information shared across domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Short user-facing message.
    pub message: String,
    /// Optional remediation hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Whether retrying the operation might succeed.
    pub retryable: bool,
}

impl FailureContext {
    /// Construct a new failure context.
    #[must_use]
    pub fn new(
        code: Option<impl Into<String>>,
        message: impl Into<String>,
        hint: Option<impl Into<String>>,
        retryable: bool,
    ) -> Self {
        Self {
            code: code.map(Into::into),
            message: message.into(),
            hint: hint.map(Into::into),
            retryable,
        }
    }

    /// Build failure context from a `UserFacingError` implementation.
    #[must_use]
    pub fn from_error<E: UserFacingError + ?Sized>(error: &E) -> Self {
        Self::new(
            error.user_code(),
            error.user_message().into_owned(),
            error.user_hint(),
            error.is_retryable(),
        )
    }
}

pub mod build;
pub mod general;
pub mod graph;
pub mod hoist;
pub mod prune;

pub use build::*;
pub use general::*;
pub use graph::*;
pub use hoist::*;
pub use prune::*;

/// Top-level application event enum that aggregates all domain-specific events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "domain", content = "event", rename_all = "snake_case")]
pub enum AppEvent {
    /// General utility events (warnings, errors, operations)
    General(GeneralEvent),

    /// Lockfile-to-graph conversion
    Graph(GraphEvent),

    /// Alias hoisting and bin linking
    Hoist(HoistEvent),

    /// Lifecycle script execution
    Build(BuildEvent),

    /// Removal of stale state
    Prune(PruneEvent),
}

impl AppEvent {
    /// Identify the source domain for this event (used for metadata/logging).
    #[must_use]
    pub fn event_source(&self) -> EventSource {
        match self {
            Self::General(_) => EventSource::GENERAL,
            Self::Graph(_) => EventSource::GRAPH,
            Self::Hoist(_) => EventSource::HOIST,
            Self::Build(_) => EventSource::BUILD,
            Self::Prune(_) => EventSource::PRUNE,
        }
    }

    /// Determine the appropriate tracing log level for this event
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;

        match self {
            Self::General(GeneralEvent::Error { .. } | GeneralEvent::OperationFailed { .. })
            | Self::Build(BuildEvent::Failed { .. }) => Level::ERROR,

            Self::General(GeneralEvent::Warning { .. })
            | Self::Build(BuildEvent::OptionalSkipped { .. } | BuildEvent::PatchSkipped { .. })
            | Self::Prune(PruneEvent::RemovalFailed { .. }) => Level::WARN,

            Self::General(GeneralEvent::DebugLog { .. })
            | Self::Graph(GraphEvent::PackageReused { .. })
            | Self::Hoist(
                HoistEvent::AliasHoisted { .. }
                | HoistEvent::PlacementSkipped { .. }
                | HoistEvent::BinLinked { .. },
            )
            | Self::Build(BuildEvent::OutputLinked { .. })
            | Self::Prune(PruneEvent::PathRemoved { .. }) => Level::DEBUG,

            // Default to INFO for most events
            _ => Level::INFO,
        }
    }

    /// Get the log target for this event (for structured logging)
    #[must_use]
    pub fn log_target(&self) -> &'static str {
        match self {
            Self::General(_) => "nmx::events::general",
            Self::Graph(_) => "nmx::events::graph",
            Self::Hoist(_) => "nmx::events::hoist",
            Self::Build(_) => "nmx::events::build",
            Self::Prune(_) => "nmx::events::prune",
        }
    }
}
