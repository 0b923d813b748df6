//! Lifecycle script and patch collaborators

use async_trait::async_trait;
use nmx_errors::{BuildError, Error};
use nmx_types::PackageManifest;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Install-time lifecycle stages, in execution order
pub const LIFECYCLE_STAGES: [&str; 3] = ["preinstall", "install", "postinstall"];

/// Runs one lifecycle stage of a package
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run `stage` for the package in `cwd`
    ///
    /// Returns whether anything was executed.
    ///
    /// # Errors
    ///
    /// Returns an error if the script exits unsuccessfully or cannot start.
    async fn run(
        &self,
        stage: &str,
        manifest: &PackageManifest,
        cwd: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<bool, Error>;
}

/// A patch to apply to an installed package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    pub patch_file: PathBuf,
    pub target_dir: PathBuf,
    pub strict: bool,
}

/// Applies patch files to package directories
#[async_trait]
pub trait PatchApplier: Send + Sync {
    /// Returns `false` when the patch does not apply cleanly
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::PatchFileMissing`] if the patch file does not
    /// exist.
    async fn apply(&self, request: &PatchRequest) -> Result<bool, Error>;
}

/// The manifest with implicit scripts filled in
///
/// A package shipping `binding.gyp` without its own `install` or
/// `preinstall` script is built with `node-gyp rebuild`.
pub async fn effective_manifest(
    manifest: Option<PackageManifest>,
    package_dir: &Path,
) -> PackageManifest {
    let mut manifest = manifest.unwrap_or_default();
    if manifest.script("install").is_none()
        && manifest.script("preinstall").is_none()
        && nmx_root::exists(&package_dir.join("binding.gyp")).await
    {
        manifest
            .scripts
            .insert("install".to_string(), "node-gyp rebuild".to_string());
    }
    manifest
}

/// Environment passed to lifecycle scripts
///
/// `PATH` starts with the `.bin` of `modules_dir`, the directory holding
/// the package and its linked dependencies.
#[must_use]
pub fn script_env(
    extra_env: &BTreeMap<String, String>,
    name: &str,
    version: &str,
    init_cwd: &Path,
    modules_dir: &Path,
) -> BTreeMap<String, String> {
    let mut env = extra_env.clone();
    env.insert("npm_package_name".to_string(), name.to_string());
    env.insert("npm_package_version".to_string(), version.to_string());
    env.insert("INIT_CWD".to_string(), init_cwd.display().to_string());

    let mut entries = vec![modules_dir.join(".bin")];
    let inherited = extra_env
        .get("PATH")
        .map(std::ffi::OsString::from)
        .or_else(|| std::env::var_os("PATH"));
    if let Some(inherited) = inherited {
        entries.extend(std::env::split_paths(&inherited));
    }
    if let Ok(path) = std::env::join_paths(entries) {
        env.insert("PATH".to_string(), path.to_string_lossy().into_owned());
    }
    env
}

/// Runs scripts through the platform shell
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellScriptRunner;

#[async_trait]
impl ScriptRunner for ShellScriptRunner {
    async fn run(
        &self,
        stage: &str,
        manifest: &PackageManifest,
        cwd: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<bool, Error> {
        let Some(script) = manifest.script(stage) else {
            return Ok(false);
        };
        let package = manifest.name.clone().unwrap_or_else(|| cwd.display().to_string());

        let mut command = shell_command(script);
        command
            .current_dir(cwd)
            .envs(env)
            .env("npm_lifecycle_event", stage)
            .env("PATH", search_path(cwd, env.get("PATH").map(String::as_str)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        tracing::debug!(%package, stage, script, "running lifecycle script");
        let output = command.output().await.map_err(|e| BuildError::ScriptFailed {
            package: package.clone(),
            stage: stage.to_string(),
            message: format!("failed to start: {e}"),
        })?;

        if output.status.success() {
            return Ok(true);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let tail: Vec<&str> = stderr.lines().rev().take(20).collect();
        let tail: Vec<&str> = tail.into_iter().rev().collect();
        Err(BuildError::ScriptFailed {
            package,
            stage: stage.to_string(),
            message: format!("{}\n{}", output.status, tail.join("\n")),
        }
        .into())
    }
}

#[cfg(unix)]
fn shell_command(script: &str) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(script);
    command
}

#[cfg(windows)]
fn shell_command(script: &str) -> Command {
    let mut command = Command::new("cmd");
    command.arg("/d").arg("/s").arg("/c").arg(script);
    command
}

/// The package's own `.bin` ahead of the `PATH` the caller prepared
fn search_path(cwd: &Path, prepared: Option<&str>) -> std::ffi::OsString {
    let mut entries = vec![cwd.join("node_modules").join(".bin")];
    let existing = prepared
        .map(std::ffi::OsString::from)
        .or_else(|| std::env::var_os("PATH"));
    if let Some(existing) = existing {
        entries.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(entries).unwrap_or_default()
}
