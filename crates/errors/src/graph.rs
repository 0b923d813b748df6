//! Dependency graph error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum GraphError {
    #[error("{dep_path} not found in the lockfile (required by {required_by})")]
    MissingDependency {
        dep_path: String,
        required_by: String,
    },

    #[error("invalid dependency path: {dep_path}")]
    InvalidDepPath { dep_path: String },

    #[error("importer {importer} not found in the lockfile")]
    ImporterNotFound { importer: String },

    #[error("unsupported platform for {package}: wanted {wanted}, current {current}")]
    UnsupportedPlatform {
        package: String,
        wanted: String,
        current: String,
    },

    #[error("unsupported engine for {package}: wanted node {wanted}, current {current}")]
    UnsupportedEngine {
        package: String,
        wanted: String,
        current: String,
    },
}

impl UserFacingError for GraphError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::MissingDependency { .. } | Self::ImporterNotFound { .. } => Some(
                "The lockfile is inconsistent with itself. Re-run install to regenerate the lockfile.",
            ),
            Self::InvalidDepPath { .. } => {
                Some("The lockfile looks corrupted. Re-run install to regenerate the lockfile.")
            }
            Self::UnsupportedPlatform { .. } | Self::UnsupportedEngine { .. } => Some(
                "Mark the dependency as optional or set `force = true` to install it anyway.",
            ),
        }
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::MissingDependency { .. } => "graph.missing_dependency",
            Self::InvalidDepPath { .. } => "graph.invalid_dep_path",
            Self::ImporterNotFound { .. } => "graph.importer_not_found",
            Self::UnsupportedPlatform { .. } => "graph.unsupported_platform",
            Self::UnsupportedEngine { .. } => "graph.unsupported_engine",
        };
        Some(code)
    }
}
