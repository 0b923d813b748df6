#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for nmx
//!
//! This crate handles loading and merging configuration from:
//! - Default values (hard-coded)
//! - Configuration file (~/.config/nmx/config.toml)
//! - Environment variables

mod runtime;

pub use runtime::RuntimeConfig;

use nmx_errors::{ConfigError, Error};
use nmx_types::IncludedDependencies;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Smallest accepted `virtual_store_dir_max_length`
pub const MIN_VIRTUAL_STORE_DIR_MAX_LENGTH: usize = 32;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub install: InstallConfig,

    #[serde(default)]
    pub hoist: HoistConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub resources: ResourceConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Install configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub include: IncludeConfig,
    #[serde(default = "default_modules_dir")]
    pub modules_dir: String,
    /// Defaults to `<modules_dir>/.nmx`
    #[serde(default)]
    pub virtual_store_dir: Option<PathBuf>,
    #[serde(default = "default_virtual_store_dir_max_length")]
    pub virtual_store_dir_max_length: usize,
    #[serde(default)]
    pub prune_direct_dependencies: bool,
    #[serde(default)]
    pub dedupe_direct_deps: bool,
    #[serde(default = "default_true")]
    pub prune_virtual_store: bool,
    #[serde(default)]
    pub prune_store: bool,
    #[serde(default)]
    pub dry_run: bool,
}

/// Dependency groups to install
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IncludeConfig {
    #[serde(default = "default_true")]
    pub dependencies: bool,
    #[serde(default = "default_true")]
    pub dev_dependencies: bool,
    #[serde(default = "default_true")]
    pub optional_dependencies: bool,
}

/// Hoisting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoistConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_hoist_pattern")]
    pub hoist_pattern: Vec<String>,
    #[serde(default)]
    pub public_hoist_pattern: Vec<String>,
}

/// Build configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    #[serde(default = "default_child_concurrency")]
    pub child_concurrency: usize,
    #[serde(default)]
    pub ignore_scripts: bool,
    #[serde(default = "default_true")]
    pub side_effects_cache_read: bool,
    #[serde(default = "default_true")]
    pub side_effects_cache_write: bool,
    /// Allow-list of package names whose scripts may run
    #[serde(default)]
    pub only_built_dependencies: Option<Vec<String>>,
    #[serde(default)]
    pub never_built_dependencies: Vec<String>,
    #[serde(default)]
    pub extra_env: BTreeMap<String, String>,
}

/// Concurrency limits for filesystem work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default = "default_link_concurrency")]
    pub link_concurrency: usize,
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            force: false,
            include: IncludeConfig::default(),
            modules_dir: default_modules_dir(),
            virtual_store_dir: None,
            virtual_store_dir_max_length: default_virtual_store_dir_max_length(),
            prune_direct_dependencies: false,
            dedupe_direct_deps: false,
            prune_virtual_store: true,
            prune_store: false,
            dry_run: false,
        }
    }
}

impl Default for IncludeConfig {
    fn default() -> Self {
        Self {
            dependencies: true,
            dev_dependencies: true,
            optional_dependencies: true,
        }
    }
}

impl From<IncludeConfig> for IncludedDependencies {
    fn from(value: IncludeConfig) -> Self {
        Self {
            dependencies: value.dependencies,
            dev_dependencies: value.dev_dependencies,
            optional_dependencies: value.optional_dependencies,
        }
    }
}

impl Default for HoistConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hoist_pattern: default_hoist_pattern(),
            public_hoist_pattern: Vec::new(),
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            child_concurrency: default_child_concurrency(),
            ignore_scripts: false,
            side_effects_cache_read: true,
            side_effects_cache_write: true,
            only_built_dependencies: None,
            never_built_dependencies: Vec::new(),
            extra_env: BTreeMap::new(),
        }
    }
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            link_concurrency: default_link_concurrency(),
            fetch_concurrency: default_fetch_concurrency(),
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_modules_dir() -> String {
    "node_modules".to_string()
}

fn default_virtual_store_dir_max_length() -> usize {
    120
}

fn default_hoist_pattern() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_child_concurrency() -> usize {
    4
}

fn default_link_concurrency() -> usize {
    32
}

fn default_fetch_concurrency() -> usize {
    16
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join("nmx").join("config.toml"))
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or if the file contents
    /// contain invalid TOML syntax that cannot be parsed.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;

        let config: Self = toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub async fn load() -> Result<Self, Error> {
        let config_path = Self::default_path()?;

        if fs::try_exists(&config_path).await.unwrap_or(false) {
            Self::load_from_file(&config_path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    /// that cannot be parsed into the expected types.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        // NMX_CHILD_CONCURRENCY
        if let Ok(value) = std::env::var("NMX_CHILD_CONCURRENCY") {
            self.build.child_concurrency =
                value.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "NMX_CHILD_CONCURRENCY".to_string(),
                    value,
                })?;
        }

        // NMX_IGNORE_SCRIPTS
        if let Ok(value) = std::env::var("NMX_IGNORE_SCRIPTS") {
            self.build.ignore_scripts = parse_bool("NMX_IGNORE_SCRIPTS", value)?;
        }

        // NMX_FORCE
        if let Ok(value) = std::env::var("NMX_FORCE") {
            self.install.force = parse_bool("NMX_FORCE", value)?;
        }

        // NMX_NODE_VERSION
        if let Ok(value) = std::env::var("NMX_NODE_VERSION") {
            self.runtime.node_version = value;
        }

        // NMX_VIRTUAL_STORE_DIR
        if let Ok(value) = std::env::var("NMX_VIRTUAL_STORE_DIR") {
            self.install.virtual_store_dir = Some(PathBuf::from(value));
        }

        self.validate()
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns an error naming the first out-of-range field.
    pub fn validate(&self) -> Result<(), Error> {
        let limits = [
            ("build.child_concurrency", self.build.child_concurrency),
            ("resources.link_concurrency", self.resources.link_concurrency),
            ("resources.fetch_concurrency", self.resources.fetch_concurrency),
        ];
        for (field, value) in limits {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                }
                .into());
            }
        }
        if self.install.virtual_store_dir_max_length < MIN_VIRTUAL_STORE_DIR_MAX_LENGTH {
            return Err(ConfigError::InvalidValue {
                field: "install.virtual_store_dir_max_length".to_string(),
                value: self.install.virtual_store_dir_max_length.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Modules directory of the root importer
    #[must_use]
    pub fn modules_dir(&self, lockfile_dir: &Path) -> PathBuf {
        lockfile_dir.join(&self.install.modules_dir)
    }

    /// Virtual store directory, resolved against the lockfile directory
    #[must_use]
    pub fn virtual_store_dir(&self, lockfile_dir: &Path) -> PathBuf {
        match &self.install.virtual_store_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => lockfile_dir.join(dir),
            None => self.modules_dir(lockfile_dir).join(".nmx"),
        }
    }

    /// Dependency inclusion policy
    #[must_use]
    pub fn included(&self) -> IncludedDependencies {
        self.install.include.into()
    }
}

fn parse_bool(field: &str, value: String) -> Result<bool, Error> {
    match value.as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value,
        }
        .into()),
    }
}
