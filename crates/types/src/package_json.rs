//! Installed package manifest (`package.json`)
//!
//! Only the fields the engine acts on are modeled: identity, lifecycle
//! scripts and executables.

use nmx_errors::{BuildError, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// File name of a package manifest
pub const PACKAGE_JSON: &str = "package.json";

/// Executables declared by a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BinField {
    /// One executable named after the package
    Single(String),
    /// Command name to relative path
    Map(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scripts: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bin: Option<BinField>,
}

impl PackageManifest {
    /// Parse manifest JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON.
    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(Error::from)
    }

    /// Read `package.json` from a package directory
    ///
    /// A missing manifest reads as `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest exists but cannot be read or parsed.
    pub async fn read(package_dir: &Path) -> Result<Option<Self>> {
        let path = package_dir.join(PACKAGE_JSON);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io_with_path(&e, &path)),
        };
        let manifest = serde_json::from_str(&contents).map_err(|e| BuildError::ManifestUnreadable {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Some(manifest))
    }

    #[must_use]
    pub fn script(&self, stage: &str) -> Option<&str> {
        self.scripts
            .get(stage)
            .map(String::as_str)
            .filter(|script| !script.trim().is_empty())
    }

    /// Executables as command name to path relative to the package dir
    ///
    /// A single `bin` string is named after the unscoped package name.
    /// Commands that would escape the bin directory are dropped.
    #[must_use]
    pub fn bin_commands(&self) -> BTreeMap<String, String> {
        let mut commands = BTreeMap::new();
        match &self.bin {
            None => {}
            Some(BinField::Single(path)) => {
                if let Some(name) = self.name.as_deref() {
                    let command = name.rsplit('/').next().unwrap_or(name);
                    commands.insert(command.to_string(), path.clone());
                }
            }
            Some(BinField::Map(map)) => {
                for (command, path) in map {
                    let command = command.rsplit('/').next().unwrap_or(command);
                    commands.insert(command.to_string(), path.clone());
                }
            }
        }
        commands.retain(|command, _| {
            !command.is_empty() && command != "." && command != ".." && !command.contains('\\')
        });
        commands
    }
}
