//! Engine abstraction: the boundary compositions are submitted across.

use std::path::{Path, PathBuf};

use dockyard_common::error::Result;
use dockyard_common::types::{Digest, ImageRef, Platform};
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::composition::Composition;
use crate::variant::PlatformVariantSet;

/// What a mount point is backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// A directory.
    Directory,
    /// A regular file.
    File,
    /// A unix socket.
    Socket,
}

/// A mount that is visible to commands but not part of the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    /// Mount point inside the container.
    pub path: String,
    /// Kind of the mounted object.
    pub kind: MountKind,
    /// Engine-side location of the mounted content.
    pub host_path: PathBuf,
}

/// A realized composition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Structural digest of the composition this was realized from.
    pub digest: Digest,
    /// Content-addressed identity of the result, including host inputs.
    pub content: Digest,
    /// Engine-side location of the root filesystem.
    pub rootfs: PathBuf,
    /// Platform selected by the composition's base.
    pub platform: Option<Platform>,
    /// Environment in effect after the last operation.
    pub env: Vec<(String, String)>,
    /// Working directory in effect after the last operation.
    pub workdir: String,
    /// Mounts in effect after the last operation.
    pub mounts: Vec<Mount>,
    /// Standard output of the most recent command.
    pub stdout: String,
}

impl Artifact {
    /// Resolves a container path against the artifact's root filesystem.
    #[must_use]
    pub fn path(&self, container_path: &str) -> PathBuf {
        let relative = container_path.trim_start_matches('/');
        if relative.is_empty() {
            self.rootfs.clone()
        } else {
            self.rootfs.join(relative)
        }
    }

    /// Resolves `path` against the artifact's working directory, the way
    /// a composition's directory and file sources do.
    #[must_use]
    pub fn workdir_path(&self, path: &str) -> PathBuf {
        if path.starts_with('/') {
            self.path(path)
        } else {
            self.path(&format!("{}/{path}", self.workdir.trim_end_matches('/')))
        }
    }

    /// Returns the value of an environment variable.
    #[must_use]
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// An execution engine compositions are realized by.
///
/// Implementations block; the [`Client`](crate::client::Client) moves calls
/// onto blocking threads and races them against cancellation. An engine must
/// make concurrent realizations of compositions that share a prefix safe,
/// serialising access to any shared cached result itself.
pub trait Engine: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Realizes a composition, reusing cached prefixes where possible.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::Execution` if any operation of the chain
    /// cannot be satisfied, or `DockyardError::Cancelled` if `cancel` fires.
    fn realize(&self, composition: &Composition, cancel: &CancelToken) -> Result<Artifact>;

    /// Copies an artifact's filesystem into a host directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the target cannot be written.
    fn export(&self, artifact: &Artifact, target: &Path) -> Result<Vec<PathBuf>>;

    /// Publishes realized per-platform artifacts under one reference and
    /// returns the digest of the resulting multi-platform index.
    ///
    /// # Errors
    ///
    /// Returns an error if any variant cannot be packed or stored.
    fn publish(
        &self,
        reference: &ImageRef,
        variants: &PlatformVariantSet<Artifact>,
    ) -> Result<Digest>;

    /// Releases engine-side resources. Called once per connection.
    ///
    /// # Errors
    ///
    /// Returns an error if resources cannot be released cleanly.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}
