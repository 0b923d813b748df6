//! Installation orchestration error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum InstallError {
    #[error("concurrency error: {message}")]
    ConcurrencyError { message: String },

    #[error("task execution failed: {message}")]
    TaskError { message: String },

    #[error("failed to read lockfile {path}: {message}")]
    LockfileUnreadable { path: String, message: String },

    #[error("failed to write {path}: {message}")]
    WriteFailed { path: String, message: String },

    #[error("modules manifest {path} is corrupted: {message}")]
    ManifestCorrupted { path: String, message: String },

    #[error("linking {alias} into {path} failed: {message}")]
    LinkFailed {
        alias: String,
        path: String,
        message: String,
    },
}

impl UserFacingError for InstallError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::LockfileUnreadable { .. } => {
                Some("Re-run install to regenerate the lockfile.")
            }
            Self::ManifestCorrupted { .. } => {
                Some("Remove the node_modules directory and re-run install.")
            }
            Self::ConcurrencyError { .. } | Self::TaskError { .. } => {
                Some("Retry the install; lower the concurrency settings if it keeps failing.")
            }
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyError { .. } | Self::TaskError { .. } | Self::LinkFailed { .. }
        )
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::ConcurrencyError { .. } => "install.concurrency_error",
            Self::TaskError { .. } => "install.task_error",
            Self::LockfileUnreadable { .. } => "install.lockfile_unreadable",
            Self::WriteFailed { .. } => "install.write_failed",
            Self::ManifestCorrupted { .. } => "install.manifest_corrupted",
            Self::LinkFailed { .. } => "install.link_failed",
        };
        Some(code)
    }
}
