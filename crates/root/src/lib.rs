#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Filesystem operations for nmx
//!
//! Directory symlinks (relative, so a project tree can be moved), hard-link
//! tree copies for sharing build outputs, best-effort removal and module
//! directory listing.

use nmx_errors::{Error, InstallError, StorageError};
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

/// Result type for filesystem operations
type Result<T> = std::result::Result<T, Error>;

/// Kind of entry found at a path, without following symlinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Missing,
    Symlink,
    Directory,
    File,
}

/// Inspect a path without following symlinks
pub async fn entry_kind(path: &Path) -> EntryKind {
    match fs::symlink_metadata(path).await {
        Ok(meta) if meta.file_type().is_symlink() => EntryKind::Symlink,
        Ok(meta) if meta.is_dir() => EntryKind::Directory,
        Ok(_) => EntryKind::File,
        Err(_) => EntryKind::Missing,
    }
}

/// Check if a path exists (following symlinks)
pub async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

/// Create a directory with all parent directories
///
/// # Errors
///
/// Returns an error if any I/O operation fails during directory creation
pub async fn create_dir_all(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|e| StorageError::from_io_with_path(&e, path).into())
}

/// Create a directory symlink at `link` pointing to `target`
///
/// The link stores a path relative to its parent directory. Parent
/// directories of `link` are created as needed.
///
/// # Errors
///
/// Returns [`StorageError::AlreadyExists`] if something already occupies
/// `link`, or [`StorageError::SymlinkFailed`] for any other failure.
pub async fn symlink_dir(target: &Path, link: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        create_dir_all(parent).await?;
    }
    let stored = link
        .parent()
        .and_then(|parent| pathdiff::diff_paths(target, parent))
        .unwrap_or_else(|| target.to_path_buf());

    platform_symlink_dir(&stored, link).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            StorageError::AlreadyExists {
                path: link.display().to_string(),
            }
            .into()
        } else {
            StorageError::SymlinkFailed {
                path: link.display().to_string(),
                target: target.display().to_string(),
                message: e.to_string(),
            }
            .into()
        }
    })
}

/// Create or replace a directory symlink
///
/// An existing symlink or file at `link` is replaced. A real directory is
/// left untouched and reported as [`StorageError::AlreadyExists`].
///
/// # Errors
///
/// Returns an error if the existing entry cannot be removed or the link
/// cannot be created.
pub async fn force_symlink_dir(target: &Path, link: &Path) -> Result<()> {
    match entry_kind(link).await {
        EntryKind::Missing => {}
        EntryKind::Symlink | EntryKind::File => {
            if read_link_target(link).await.as_deref() == Some(target) {
                return Ok(());
            }
            remove_link(link).await?;
        }
        EntryKind::Directory => {
            return Err(StorageError::AlreadyExists {
                path: link.display().to_string(),
            }
            .into())
        }
    }
    symlink_dir(target, link).await
}

/// Create or replace a file symlink
///
/// Used for executables; anything but a real directory at `link` is
/// replaced.
///
/// # Errors
///
/// Returns an error if the existing entry cannot be removed or the link
/// cannot be created.
pub async fn force_symlink_file(target: &Path, link: &Path) -> Result<()> {
    match entry_kind(link).await {
        EntryKind::Missing => {}
        EntryKind::Symlink | EntryKind::File => remove_link(link).await?,
        EntryKind::Directory => {
            return Err(StorageError::AlreadyExists {
                path: link.display().to_string(),
            }
            .into())
        }
    }
    let Some(parent) = link.parent() else {
        return Err(StorageError::InvalidPath {
            path: link.display().to_string(),
        }
        .into());
    };
    create_dir_all(parent).await?;
    let stored = pathdiff::diff_paths(target, parent).unwrap_or_else(|| target.to_path_buf());
    platform_symlink_file(&stored, link)
        .await
        .map_err(|e| {
            StorageError::SymlinkFailed {
                path: link.display().to_string(),
                target: target.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
}

/// Add execute permission for everyone who can read the file
///
/// # Errors
///
/// Returns an error if the file's metadata cannot be read or updated.
#[cfg(unix)]
pub async fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let meta = fs::metadata(path)
        .await
        .map_err(|e| StorageError::from_io_with_path(&e, path))?;
    let mut permissions = meta.permissions();
    let mode = permissions.mode();
    let wanted = mode | ((mode & 0o444) >> 2);
    if wanted != mode {
        permissions.set_mode(wanted);
        fs::set_permissions(path, permissions)
            .await
            .map_err(|e| StorageError::from_io_with_path(&e, path))?;
    }
    Ok(())
}

/// Add execute permission (no-op where permissions carry no such bit)
///
/// # Errors
///
/// Never fails on this platform.
#[cfg(not(unix))]
pub async fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
async fn platform_symlink_file(target: &Path, link: &Path) -> std::io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(windows)]
async fn platform_symlink_file(target: &Path, link: &Path) -> std::io::Result<()> {
    fs::symlink_file(target, link).await
}

#[cfg(unix)]
async fn platform_symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    fs::symlink(target, link).await
}

#[cfg(windows)]
async fn platform_symlink_dir(target: &Path, link: &Path) -> std::io::Result<()> {
    fs::symlink_dir(target, link).await
}

/// Resolve where a symlink points, as an absolute path
///
/// Returns `None` if `link` is not a symlink.
pub async fn read_link_target(link: &Path) -> Option<PathBuf> {
    let stored = fs::read_link(link).await.ok()?;
    if stored.is_absolute() {
        return Some(normalize(&stored));
    }
    let parent = link.parent()?;
    Some(normalize(&parent.join(stored)))
}

/// Lexically normalize `.` and `..` components
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

async fn remove_link(path: &Path) -> Result<()> {
    let result = fs::remove_file(path).await;
    #[cfg(windows)]
    let result = match result {
        Ok(()) => Ok(()),
        Err(_) => fs::remove_dir(path).await,
    };
    result.map_err(|e| StorageError::from_io_with_path(&e, path).into())
}

/// Remove a file, symlink or directory tree
///
/// Symlinks are removed without touching their target. Returns `false`
/// when nothing existed at `path`.
///
/// # Errors
///
/// Returns an error if the entry exists but cannot be removed.
pub async fn remove_path(path: &Path) -> Result<bool> {
    match entry_kind(path).await {
        EntryKind::Missing => Ok(false),
        EntryKind::Symlink | EntryKind::File => remove_link(path).await.map(|()| true),
        EntryKind::Directory => fs::remove_dir_all(path)
            .await
            .map(|()| true)
            .map_err(|e| StorageError::from_io_with_path(&e, path).into()),
    }
}

/// Hard-link every file of `src` into each destination directory
///
/// Nested `node_modules` directories are not copied. Existing files at
/// the destination are replaced. When hard links are not possible (for
/// example across devices) the file is copied instead.
///
/// # Errors
///
/// Returns an error if walking the source or writing a destination fails.
pub async fn hard_link_dir(src: &Path, dests: &[PathBuf]) -> Result<()> {
    if dests.is_empty() {
        return Ok(());
    }
    let src = src.to_path_buf();
    let dests = dests.to_vec();
    tokio::task::spawn_blocking(move || hard_link_dir_blocking(&src, &dests))
        .await
        .map_err(|e| InstallError::TaskError {
            message: format!("hard link task failed: {e}"),
        })?
}

fn hard_link_dir_blocking(src: &Path, dests: &[PathBuf]) -> Result<()> {
    let walker = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != "node_modules");

    for entry in walker {
        let entry = entry.map_err(|e| StorageError::IoError {
            message: format!("{}: {e}", src.display()),
        })?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        for dest in dests {
            let target = dest.join(relative);
            if entry.file_type().is_dir() {
                std::fs::create_dir_all(&target)
                    .map_err(|e| StorageError::from_io_with_path(&e, &target))?;
            } else {
                link_or_copy(entry.path(), &target)?;
            }
        }
    }
    Ok(())
}

fn link_or_copy(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StorageError::from_io_with_path(&e, parent))?;
    }
    if std::fs::symlink_metadata(dst).is_ok() {
        std::fs::remove_file(dst).map_err(|e| StorageError::from_io_with_path(&e, dst))?;
    }
    if std::fs::hard_link(src, dst).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dst)
        .map(|_| ())
        .map_err(|e| {
            StorageError::HardLinkFailed {
                path: dst.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
}

/// List the package aliases present in a modules directory
///
/// Scoped packages are reported as `@scope/name`. Dot entries (the
/// virtual store, `.bin`, manifests) are ignored. A missing directory
/// yields an empty list.
///
/// # Errors
///
/// Returns an error if the directory exists but cannot be read.
pub async fn read_modules_dir(modules_dir: &Path) -> Result<Vec<String>> {
    let mut aliases = Vec::new();
    let mut entries = match fs::read_dir(modules_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(aliases),
        Err(e) => return Err(StorageError::from_io_with_path(&e, modules_dir).into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if name.starts_with('@') {
            let mut scoped = fs::read_dir(entry.path()).await?;
            while let Some(inner) = scoped.next_entry().await? {
                let inner_name = inner.file_name().to_string_lossy().into_owned();
                if !inner_name.starts_with('.') {
                    aliases.push(format!("{name}/{inner_name}"));
                }
            }
        } else {
            aliases.push(name);
        }
    }
    aliases.sort();
    Ok(aliases)
}
