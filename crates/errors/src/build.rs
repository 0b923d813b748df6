//! Lifecycle build error types

use std::borrow::Cow;

use crate::UserFacingError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum BuildError {
    #[error("{stage} script of {package} failed: {message}")]
    ScriptFailed {
        package: String,
        stage: String,
        message: String,
    },

    #[error("could not apply patch {patch} to {package}")]
    PatchFailed { package: String, patch: String },

    #[error("patch file not found: {path}")]
    PatchFileMissing { path: String },

    #[error("failed to cache side effects of {package}: {message}")]
    SideEffectsUploadFailed { package: String, message: String },

    #[error("failed to read package manifest {path}: {message}")]
    ManifestUnreadable { path: String, message: String },
}

impl UserFacingError for BuildError {
    fn user_message(&self) -> Cow<'_, str> {
        Cow::Owned(self.to_string())
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::PatchFailed { .. } => Some(
                "Update the patch so it applies cleanly, or mark it non-strict to only warn.",
            ),
            Self::PatchFileMissing { .. } => {
                Some("Restore the patch file or remove it from the patched dependencies.")
            }
            Self::ScriptFailed { .. } => Some(
                "Inspect the script output above. Add the package to the build deny-list to skip its scripts.",
            ),
            _ => None,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::SideEffectsUploadFailed { .. })
    }

    fn user_code(&self) -> Option<&'static str> {
        let code = match self {
            Self::ScriptFailed { .. } => "build.script_failed",
            Self::PatchFailed { .. } => "build.patch_failed",
            Self::PatchFileMissing { .. } => "build.patch_file_missing",
            Self::SideEffectsUploadFailed { .. } => "build.side_effects_upload_failed",
            Self::ManifestUnreadable { .. } => "build.manifest_unreadable",
        };
        Some(code)
    }
}
