//! Filesystem layer extraction and reproducible packing.
//!
//! Packed layers are byte-for-byte reproducible: entries are sorted by
//! path, ownership is zeroed, and every timestamp is the epoch, so the same
//! root filesystem always yields the same layer digest.

use std::io::{Read, Write};
use std::path::Path;

use dockyard_common::error::{DockyardError, Result};
use dockyard_common::types::Digest;
use walkdir::WalkDir;

use crate::hash::walk_error;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A packed, gzip-compressed layer.
#[derive(Debug, Clone)]
pub struct PackedLayer {
    /// Digest of the compressed bytes.
    pub digest: Digest,
    /// Digest of the uncompressed tar stream.
    pub diff_id: Digest,
    /// Compressed layer contents.
    pub bytes: Vec<u8>,
}

/// Extracts a tar archive into the target directory.
///
/// Plain and gzip-compressed archives are both accepted; compression is
/// detected from the content, not the file name.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or unpacked.
pub fn extract_layer(archive_path: &Path, target: &Path) -> Result<u64> {
    tracing::info!(
        archive = %archive_path.display(),
        target = %target.display(),
        "extracting layer"
    );
    crate::tree::create_dir(target)?;

    let mut file =
        std::fs::File::open(archive_path).map_err(|e| DockyardError::io(archive_path, e))?;
    let size_bytes = file
        .metadata()
        .map_err(|e| DockyardError::io(archive_path, e))?
        .len();

    let mut magic = [0u8; 2];
    let gzip = file.read_exact(&mut magic).is_ok() && magic == GZIP_MAGIC;
    let file =
        std::fs::File::open(archive_path).map_err(|e| DockyardError::io(archive_path, e))?;

    let unpacked = if gzip {
        tar::Archive::new(flate2::read::GzDecoder::new(file)).unpack(target)
    } else {
        tar::Archive::new(file).unpack(target)
    };
    unpacked.map_err(|e| DockyardError::io(target, e))?;

    tracing::debug!(size = size_bytes, "layer extracted");
    Ok(size_bytes)
}

/// Packs a directory into a reproducible gzip-compressed tar layer.
///
/// # Errors
///
/// Returns an error if the tree cannot be walked or read.
pub fn pack_layer(root: &Path) -> Result<PackedLayer> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        append_entry(&mut builder, entry.path(), rel)?;
    }

    let tar_bytes = builder
        .into_inner()
        .map_err(|e| DockyardError::io(root, e))?;
    let diff_id = Digest::of_bytes(&tar_bytes);

    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(&tar_bytes)
        .map_err(|e| DockyardError::io(root, e))?;
    let bytes = encoder.finish().map_err(|e| DockyardError::io(root, e))?;

    Ok(PackedLayer {
        digest: Digest::of_bytes(&bytes),
        diff_id,
        bytes,
    })
}

fn append_entry(builder: &mut tar::Builder<Vec<u8>>, path: &Path, rel: &Path) -> Result<()> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| DockyardError::io(path, e))?;
    let mut header = tar::Header::new_gnu();
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mode(mode_of(&meta));

    let appended = if meta.is_dir() {
        header.set_entry_type(tar::EntryType::Directory);
        header.set_size(0);
        builder.append_data(&mut header, rel, std::io::empty())
    } else if meta.file_type().is_symlink() {
        let target = std::fs::read_link(path).map_err(|e| DockyardError::io(path, e))?;
        header.set_entry_type(tar::EntryType::Symlink);
        header.set_size(0);
        builder.append_link(&mut header, rel, target)
    } else if meta.is_file() {
        let file = std::fs::File::open(path).map_err(|e| DockyardError::io(path, e))?;
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(meta.len());
        builder.append_data(&mut header, rel, file)
    } else {
        return Ok(());
    };
    appended.map_err(|e| DockyardError::io(path, e))
}

#[cfg(unix)]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() { 0o755 } else { 0o644 }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn create_test_tar(dir: &Path, gzip: bool) -> PathBuf {
        let path = dir.join(if gzip { "layer.bin" } else { "layer.tar" });
        let file = std::fs::File::create(&path).expect("create archive");
        let data = b"hello from layer";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        if gzip {
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);
            builder
                .append_data(&mut header, "hello.txt", &data[..])
                .expect("append");
            let encoder = builder.into_inner().expect("finish tar");
            let _ = encoder.finish().expect("finish gzip");
        } else {
            let mut builder = tar::Builder::new(file);
            builder
                .append_data(&mut header, "hello.txt", &data[..])
                .expect("append");
            builder.finish().expect("finish tar");
        }
        path
    }

    #[test]
    fn extract_plain_tar_creates_expected_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = create_test_tar(dir.path(), false);
        let target = dir.path().join("out");
        let size = extract_layer(&archive, &target).expect("extract");
        assert!(size > 0);
        assert_eq!(
            std::fs::read_to_string(target.join("hello.txt")).expect("read"),
            "hello from layer"
        );
    }

    #[test]
    fn extract_detects_gzip_without_extension() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = create_test_tar(dir.path(), true);
        let target = dir.path().join("out");
        let _ = extract_layer(&archive, &target).expect("extract");
        assert!(target.join("hello.txt").exists());
    }

    #[test]
    fn extract_nonexistent_archive_returns_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(extract_layer(&dir.path().join("missing.tar"), &dir.path().join("out")).is_err());
    }

    #[test]
    fn pack_layer_is_reproducible() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("rootfs");
        std::fs::create_dir_all(root.join("bin")).expect("mkdir");
        std::fs::write(root.join("bin/calc"), b"\x7fELF").expect("write");

        let first = pack_layer(&root).expect("pack");
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(root.join("bin/calc"), b"\x7fELF").expect("touch");
        let second = pack_layer(&root).expect("pack again");

        assert_eq!(first.digest, second.digest);
        assert_eq!(first.diff_id, second.diff_id);
        assert_ne!(first.digest, first.diff_id);
    }

    #[test]
    fn packed_layer_extracts_back_to_same_tree() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("rootfs");
        std::fs::create_dir_all(root.join("etc")).expect("mkdir");
        std::fs::write(root.join("etc/motd"), b"hi").expect("write");

        let layer = pack_layer(&root).expect("pack");
        let archive = dir.path().join("layer.tgz");
        std::fs::write(&archive, &layer.bytes).expect("write layer");
        let target = dir.path().join("unpacked");
        let _ = extract_layer(&archive, &target).expect("extract");
        assert_eq!(std::fs::read(target.join("etc/motd")).expect("read"), b"hi");
    }
}
