//! Dependency path parsing
//!
//! A dependency path identifies one resolved package in one peer context,
//! e.g. `@scope/name@1.0.0(react@18.2.0)`. Older lockfiles prefix it with
//! a `/`; both spellings are accepted.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical identifier of a resolved package within a lockfile
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DepPath(String);

impl DepPath {
    /// Wrap a dependency path string
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw dependency path
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The dependency path without its peer-context suffix
    #[must_use]
    pub fn without_peers(&self) -> &str {
        let trimmed = self.0.strip_prefix('/').unwrap_or(&self.0);
        if trimmed.starts_with("file:") {
            return trimmed;
        }
        match trimmed.find('(') {
            Some(idx) => &trimmed[..idx],
            None => trimmed,
        }
    }

    /// Split into package name and version
    ///
    /// Returns `None` for bare `file:` paths that carry no package name.
    #[must_use]
    pub fn name_and_version(&self) -> Option<(&str, &str)> {
        let base = self.without_peers();
        if base.starts_with("file:") {
            return None;
        }
        let idx = base.get(1..)?.find('@')? + 1;
        let (name, version) = (&base[..idx], &base[idx + 1..]);
        if name.is_empty() || version.is_empty() {
            return None;
        }
        Some((name, version))
    }

    /// Package name encoded in the dependency path
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name_and_version().map(|(name, _)| name)
    }

    /// Package version encoded in the dependency path
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.name_and_version().map(|(_, version)| version)
    }

    /// Translate a dependency reference found under `alias` into a dependency path
    ///
    /// `link:` references point at workspace directories and have no
    /// dependency path. References that already look like `name@version`
    /// are used verbatim; everything else is qualified with the alias.
    #[must_use]
    pub fn from_reference(alias: &str, reference: &str) -> Option<Self> {
        if reference.starts_with("link:") {
            return None;
        }
        if reference.starts_with('@') || reference.starts_with('/') {
            return Some(Self::new(reference));
        }
        let Some(at) = reference.find('@') else {
            return Some(Self::new(format!("{alias}@{reference}")));
        };
        let colon_before = reference.find(':').is_some_and(|colon| colon < at);
        let bracket_before = reference.find('(').is_some_and(|bracket| bracket < at);
        if colon_before || bracket_before {
            Some(Self::new(format!("{alias}@{reference}")))
        } else {
            Some(Self::new(reference))
        }
    }
}

impl fmt::Display for DepPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DepPath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DepPath {
    fn from(value: String) -> Self {
        Self(value)
    }
}
