//! Dependency inclusion policy

use serde::{Deserialize, Serialize};

/// Which dependency groups take part in an install
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludedDependencies {
    #[serde(default = "default_true")]
    pub dependencies: bool,
    #[serde(default = "default_true")]
    pub dev_dependencies: bool,
    #[serde(default = "default_true")]
    pub optional_dependencies: bool,
}

impl IncludedDependencies {
    /// Whether the given dependency group is included
    #[must_use]
    pub fn includes(&self, field: DependenciesField) -> bool {
        match field {
            DependenciesField::Dependencies => self.dependencies,
            DependenciesField::DevDependencies => self.dev_dependencies,
            DependenciesField::OptionalDependencies => self.optional_dependencies,
        }
    }

    /// Production-only policy (no dev dependencies)
    #[must_use]
    pub fn production() -> Self {
        Self {
            dev_dependencies: false,
            ..Self::default()
        }
    }
}

impl Default for IncludedDependencies {
    fn default() -> Self {
        Self {
            dependencies: true,
            dev_dependencies: true,
            optional_dependencies: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Dependency group an importer declares a dependency in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DependenciesField {
    Dependencies,
    DevDependencies,
    OptionalDependencies,
}

impl DependenciesField {
    /// All groups in precedence order (later groups override earlier ones)
    pub const ALL: [Self; 3] = [
        Self::DevDependencies,
        Self::Dependencies,
        Self::OptionalDependencies,
    ];
}
