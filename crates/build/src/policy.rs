//! Which packages may run lifecycle scripts

use nmx_config::BuildConfig;
use std::collections::BTreeSet;

/// Decides whether a package is allowed to run its lifecycle scripts
pub trait BuildPolicy: Send + Sync {
    fn is_allowed(&self, name: &str) -> bool;
}

/// Allows every package
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl BuildPolicy for AllowAll {
    fn is_allowed(&self, _name: &str) -> bool {
        true
    }
}

/// Allow-list and deny-list by package name
///
/// The deny-list wins over the allow-list. Without an allow-list every
/// package not denied is allowed.
#[derive(Debug, Clone, Default)]
pub struct ListedBuildPolicy {
    only: Option<BTreeSet<String>>,
    never: BTreeSet<String>,
}

impl ListedBuildPolicy {
    #[must_use]
    pub fn new(only: Option<BTreeSet<String>>, never: BTreeSet<String>) -> Self {
        Self { only, never }
    }

    #[must_use]
    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            only: config
                .only_built_dependencies
                .as_ref()
                .map(|names| names.iter().cloned().collect()),
            never: config.never_built_dependencies.iter().cloned().collect(),
        }
    }
}

impl BuildPolicy for ListedBuildPolicy {
    fn is_allowed(&self, name: &str) -> bool {
        if self.never.contains(name) {
            return false;
        }
        self.only.as_ref().is_none_or(|only| only.contains(name))
    }
}
