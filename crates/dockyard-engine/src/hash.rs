//! SHA-256 content hashing for files and directory trees.
//!
//! Host inputs of a composition are hashed so that the snapshot store
//! notices when a mounted or copied host path changes between runs.

use std::io::Read;
use std::path::Path;

use dockyard_common::error::{DockyardError, Result};
use dockyard_common::types::Digest;
use sha2::{Digest as _, Sha256};
use walkdir::WalkDir;

/// Computes the SHA-256 digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Digest> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let mut file = std::fs::File::open(path).map_err(|e| DockyardError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| DockyardError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(Digest::from_hasher(hasher))
}

/// Validates that a file matches the expected SHA-256 digest.
///
/// # Errors
///
/// Returns `DockyardError::HashMismatch` if the digests differ.
pub fn validate_hash(path: &Path, expected: &Digest) -> Result<()> {
    let actual = hash_file(path)?;
    if &actual != expected {
        return Err(DockyardError::HashMismatch {
            resource: path.display().to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

/// Computes a deterministic digest over a directory tree.
///
/// Every entry contributes its relative path and kind; files add their
/// content digest and symlinks their target. Sockets and devices are
/// skipped.
///
/// # Errors
///
/// Returns an error if the tree cannot be walked or a file cannot be read.
pub fn hash_directory(path: &Path) -> Result<Digest> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(path, e))?;
        let rel = entry
            .path()
            .strip_prefix(path)
            .unwrap_or_else(|_| entry.path())
            .to_string_lossy()
            .into_owned();
        if rel.is_empty() {
            continue;
        }

        let file_type = entry.file_type();
        let line = if file_type.is_file() {
            format!("F:{rel}:{}", hash_file(entry.path())?.as_hex())
        } else if file_type.is_dir() {
            format!("D:{rel}")
        } else if file_type.is_symlink() {
            let target =
                std::fs::read_link(entry.path()).map_err(|e| DockyardError::io(entry.path(), e))?;
            format!("L:{rel}:{}", target.display())
        } else {
            continue;
        };
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    Ok(Digest::from_hasher(hasher))
}

/// Computes a cheap digest over a directory tree's metadata.
///
/// Every entry contributes its relative path, kind, length and timestamps,
/// so any write to the tree changes the result without reading file
/// contents.
///
/// # Errors
///
/// Returns an error if the tree cannot be walked.
pub fn fingerprint_directory(path: &Path) -> Result<Digest> {
    let mut hasher = Sha256::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(path, e))?;
        let meta = entry.metadata().map_err(|e| walk_error(path, e))?;
        let rel = entry.path().strip_prefix(path).unwrap_or_else(|_| entry.path());
        let modified = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());
        let line = format!(
            "{}:{:?}:{}:{modified}:{}",
            rel.display(),
            meta.file_type(),
            meta.len(),
            change_time(&meta)
        );
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    Ok(Digest::from_hasher(hasher))
}

#[cfg(unix)]
fn change_time(meta: &std::fs::Metadata) -> String {
    use std::os::unix::fs::MetadataExt;
    format!("{}.{}:{}", meta.ctime(), meta.ctime_nsec(), meta.ino())
}

#[cfg(not(unix))]
fn change_time(_meta: &std::fs::Metadata) -> String {
    String::new()
}

pub(crate) fn walk_error(root: &Path, err: walkdir::Error) -> DockyardError {
    let path = err.path().unwrap_or(root).to_path_buf();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
    DockyardError::io(path, source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_file_matches_known_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("empty");
        std::fs::write(&path, b"").expect("write");
        assert_eq!(
            hash_file(&path).expect("hash").as_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn validate_hash_rejects_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob");
        std::fs::write(&path, b"payload").expect("write");
        let err = validate_hash(&path, &Digest::of_bytes(b"other")).unwrap_err();
        assert!(matches!(err, DockyardError::HashMismatch { .. }));
        validate_hash(&path, &Digest::of_bytes(b"payload")).expect("matching digest");
    }

    #[test]
    fn hash_directory_is_stable_and_content_sensitive() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("sub")).expect("mkdir");
        std::fs::write(dir.path().join("sub/a.txt"), b"a").expect("write");
        std::fs::write(dir.path().join("b.txt"), b"b").expect("write");

        let first = hash_directory(dir.path()).expect("hash");
        assert_eq!(first, hash_directory(dir.path()).expect("hash again"));

        std::fs::write(dir.path().join("b.txt"), b"changed").expect("rewrite");
        assert_ne!(first, hash_directory(dir.path()).expect("hash changed"));
    }

    #[test]
    fn hash_directory_missing_root_is_an_error() {
        assert!(hash_directory(Path::new("/nonexistent/dockyard/tree")).is_err());
    }

    #[test]
    fn fingerprint_tracks_metadata_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.txt"), b"a").expect("write");

        let first = fingerprint_directory(dir.path()).expect("fingerprint");
        assert_eq!(first, fingerprint_directory(dir.path()).expect("again"));

        std::fs::write(dir.path().join("a.txt"), b"longer").expect("rewrite");
        assert_ne!(first, fingerprint_directory(dir.path()).expect("after write"));

        let second = fingerprint_directory(dir.path()).expect("fingerprint");
        std::fs::write(dir.path().join("new.txt"), b"").expect("add");
        assert_ne!(second, fingerprint_directory(dir.path()).expect("after add"));
    }
}
