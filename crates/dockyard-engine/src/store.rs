//! On-disk snapshot store.
//!
//! Every realized chain node lives in `snapshots/<key>/` with a
//! `state.json` describing it and a `.complete` marker written last.
//! Nodes are built in `tmp/<uuid>/` and renamed into place, so a reader
//! never sees a half-written snapshot. Nodes that do not touch the
//! filesystem share their parent's root filesystem through `rootfs_key`.

use std::path::{Path, PathBuf};

use dockyard_common::error::{DockyardError, Result};
use dockyard_common::types::{Digest, Platform};
use dockyard_core::engine::{Artifact, Mount};
use serde::{Deserialize, Serialize};

const COMPLETE_MARKER: &str = ".complete";
const STATE_FILE: &str = "state.json";
const ROOTFS_DIR: &str = "rootfs";

/// Persisted description of one realized chain node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotState {
    /// Cache key of this node.
    pub key: String,
    /// Cache key of the node whose `rootfs/` holds this node's filesystem.
    pub rootfs_key: String,
    /// Structural digest of the composition.
    pub digest: Digest,
    /// Platform selected by the chain's base.
    pub platform: Option<Platform>,
    /// Environment in effect.
    pub env: Vec<(String, String)>,
    /// Working directory in effect.
    pub workdir: String,
    /// Mounts in effect.
    pub mounts: Vec<Mount>,
    /// Standard output of the most recent command.
    pub stdout: String,
}

/// Handle on the snapshot store under a data directory.
#[derive(Debug)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    /// Opens the store, creating its directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let store = Self {
            root: data_dir.to_path_buf(),
        };
        for dir in [
            store.root.join("snapshots"),
            store.root.join("tmp"),
            store.empty_dir(),
        ] {
            crate::tree::create_dir(&dir)?;
        }
        tracing::debug!(path = %store.root.display(), "snapshot store opened");
        Ok(store)
    }

    /// Root data directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of the snapshot with the given key.
    #[must_use]
    pub fn snapshot_dir(&self, key: &str) -> PathBuf {
        self.root.join("snapshots").join(key)
    }

    /// Root filesystem directory of the snapshot with the given key.
    #[must_use]
    pub fn rootfs(&self, key: &str) -> PathBuf {
        self.snapshot_dir(key).join(ROOTFS_DIR)
    }

    /// A directory that is always empty; backs `DirectorySource::Empty`.
    #[must_use]
    pub fn empty_dir(&self) -> PathBuf {
        self.root.join("empty")
    }

    /// Directory pinned git checkouts are kept in.
    #[must_use]
    pub fn sources_dir(&self) -> PathBuf {
        self.root.join("sources")
    }

    /// Directory remote base image archives are cached in.
    #[must_use]
    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    /// Returns `true` once the snapshot has been committed.
    #[must_use]
    pub fn is_complete(&self, key: &str) -> bool {
        self.snapshot_dir(key).join(COMPLETE_MARKER).exists()
    }

    /// Loads a committed snapshot's state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file is missing or malformed.
    pub fn load(&self, key: &str) -> Result<SnapshotState> {
        let path = self.snapshot_dir(key).join(STATE_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| DockyardError::io(&path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Creates a fresh staging directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn staging(&self) -> Result<PathBuf> {
        let dir = self
            .root
            .join("tmp")
            .join(uuid::Uuid::new_v4().to_string());
        crate::tree::create_dir(&dir)?;
        Ok(dir)
    }

    /// Writes `state` into `staging` and atomically moves it into place.
    ///
    /// A leftover directory for the same key without a completion marker is
    /// replaced. Callers hold the key's lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be written or the rename fails.
    pub fn commit(&self, staging: &Path, state: &SnapshotState) -> Result<()> {
        let state_path = staging.join(STATE_FILE);
        let json = serde_json::to_vec_pretty(state)?;
        std::fs::write(&state_path, json).map_err(|e| DockyardError::io(&state_path, e))?;
        let marker = staging.join(COMPLETE_MARKER);
        std::fs::write(&marker, b"").map_err(|e| DockyardError::io(&marker, e))?;

        let target = self.snapshot_dir(&state.key);
        crate::tree::remove_path(&target)?;
        std::fs::rename(staging, &target).map_err(|e| DockyardError::io(&target, e))?;
        tracing::debug!(key = %state.key, "snapshot committed");
        Ok(())
    }

    /// Builds the artifact view of a committed snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not a valid digest.
    pub fn artifact(&self, state: &SnapshotState) -> Result<Artifact> {
        Ok(Artifact {
            digest: state.digest.clone(),
            content: Digest::from_hex(state.key.clone())?,
            rootfs: self.rootfs(&state.rootfs_key),
            platform: state.platform,
            env: state.env.clone(),
            workdir: state.workdir.clone(),
            mounts: state.mounts.clone(),
            stdout: state.stdout.clone(),
        })
    }

    /// Root filesystem directory inside a staging directory.
    #[must_use]
    pub fn staging_rootfs(staging: &Path) -> PathBuf {
        staging.join(ROOTFS_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(key: &str) -> SnapshotState {
        SnapshotState {
            key: key.to_string(),
            rootfs_key: key.to_string(),
            digest: Digest::of_bytes(b"composition"),
            platform: None,
            env: vec![("PATH".into(), "/bin".into())],
            workdir: "/".into(),
            mounts: Vec::new(),
            stdout: String::new(),
        }
    }

    #[test]
    fn open_creates_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::open(dir.path()).expect("open");
        assert!(dir.path().join("snapshots").is_dir());
        assert!(store.empty_dir().is_dir());
    }

    #[test]
    fn commit_moves_staging_into_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::open(dir.path()).expect("open");
        let key = Digest::of_bytes(b"key").as_hex().to_string();

        let staging = store.staging().expect("staging");
        let rootfs = SnapshotStore::staging_rootfs(&staging);
        std::fs::create_dir_all(&rootfs).expect("mkdir");
        std::fs::write(rootfs.join("file"), b"x").expect("write");
        assert!(!store.is_complete(&key));

        store.commit(&staging, &state(&key)).expect("commit");
        assert!(store.is_complete(&key));
        assert!(!staging.exists());
        assert!(store.rootfs(&key).join("file").exists());
        assert_eq!(store.load(&key).expect("load"), state(&key));
    }

    #[test]
    fn commit_replaces_incomplete_leftover() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::open(dir.path()).expect("open");
        let key = Digest::of_bytes(b"leftover").as_hex().to_string();
        std::fs::create_dir_all(store.snapshot_dir(&key).join("junk")).expect("mkdir");

        let staging = store.staging().expect("staging");
        store.commit(&staging, &state(&key)).expect("commit");
        assert!(!store.snapshot_dir(&key).join("junk").exists());
        assert!(store.is_complete(&key));
    }

    #[test]
    fn artifact_points_at_shared_rootfs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::open(dir.path()).expect("open");
        let key = Digest::of_bytes(b"child").as_hex().to_string();
        let parent = Digest::of_bytes(b"parent").as_hex().to_string();
        let mut s = state(&key);
        s.rootfs_key.clone_from(&parent);

        let artifact = store.artifact(&s).expect("artifact");
        assert_eq!(artifact.rootfs, store.rootfs(&parent));
        assert_eq!(artifact.content.as_hex(), key);
    }

    #[test]
    fn load_rejects_state_with_malformed_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SnapshotStore::open(dir.path()).expect("open");
        let key = Digest::of_bytes(b"tampered").as_hex().to_string();
        let snapshot = store.snapshot_dir(&key);
        std::fs::create_dir_all(&snapshot).expect("mkdir");
        let mut value = serde_json::to_value(state(&key)).expect("to value");
        value["digest"] = serde_json::Value::String("abc".into());
        std::fs::write(snapshot.join(STATE_FILE), value.to_string()).expect("write");

        assert!(store.load(&key).is_err());
    }
}
