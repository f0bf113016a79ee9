//! Directory tree helpers shared by the snapshot store and export.

use std::path::{Component, Path, PathBuf};

use dockyard_common::error::{DockyardError, Result};
use walkdir::WalkDir;

use crate::hash::walk_error;

/// Joins a container path onto the working directory and normalises it.
///
/// The result is always absolute; `..` never climbs above `/`. A trailing
/// slash on `path` is preserved.
#[must_use]
pub fn container_path(workdir: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{path}", workdir.trim_end_matches('/'))
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                let _ = parts.pop();
            }
            other => parts.push(other),
        }
    }
    let mut normalised = format!("/{}", parts.join("/"));
    if path.ends_with('/') && normalised != "/" {
        normalised.push('/');
    }
    normalised
}

/// Maps an absolute container path onto a root filesystem directory.
#[must_use]
pub fn host_path(rootfs: &Path, container_path: &str) -> PathBuf {
    let mut out = rootfs.to_path_buf();
    for component in Path::new(container_path).components() {
        if let Component::Normal(part) = component {
            out.push(part);
        }
    }
    out
}

/// Recursively copies the contents of `src` into `dst`, merging with what
/// is already there. Returns the destination paths of copied files.
///
/// # Errors
///
/// Returns an error if `src` cannot be walked or a destination cannot be
/// written.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<Vec<PathBuf>> {
    create_dir(dst)?;
    let mut written = Vec::new();
    for entry in WalkDir::new(src).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(src, e))?;
        let Ok(rel) = entry.path().strip_prefix(src) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            create_dir(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            written.push(target);
        } else if file_type.is_file() {
            let _ = std::fs::copy(entry.path(), &target)
                .map_err(|e| DockyardError::io(&target, e))?;
            written.push(target);
        }
    }
    Ok(written)
}

/// Copies a single file, creating parent directories as needed.
///
/// # Errors
///
/// Returns an error if the source cannot be read or the destination
/// cannot be written.
pub fn copy_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        create_dir(parent)?;
    }
    let _ = std::fs::copy(src, dst).map_err(|e| DockyardError::io(src, e))?;
    Ok(())
}

/// Creates a directory and all of its parents.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| DockyardError::io(path, e))
}

/// Removes a file, symlink, or directory tree if present.
///
/// # Errors
///
/// Returns an error if an existing entry cannot be removed.
pub fn remove_path(path: &Path) -> Result<()> {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        return Ok(());
    };
    let removed = if meta.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    removed.map_err(|e| DockyardError::io(path, e))
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = std::fs::read_link(src).map_err(|e| DockyardError::io(src, e))?;
    remove_path(dst)?;
    std::os::unix::fs::symlink(&link, dst).map_err(|e| DockyardError::io(dst, e))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let _ = std::fs::copy(src, dst).map_err(|e| DockyardError::io(dst, e))?;
    Ok(())
}
