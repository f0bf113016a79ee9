//! Immutable operation chains.
//!
//! A [`Composition`] is a shared pointer to its last operation and its
//! parent. Appending returns a new value and never touches the receiver, so
//! one prefix can seed any number of independent branches, across threads,
//! without locking.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use dockyard_common::error::Result;
use dockyard_common::types::{Digest, ImageRef, Platform};

use crate::operation::{BaseImage, Fingerprint, Operation};
use crate::source::{DirectorySource, FileSource, SocketSource};

#[derive(Debug)]
struct Node {
    parent: Option<Composition>,
    operation: Operation,
    digest: Digest,
    platform: Option<Platform>,
    depth: usize,
}

/// Everything needed to derive a container or directory, never the
/// realized result itself.
///
/// Two compositions are equal when their operation chains are structurally
/// identical; equality and hashing go through [`Composition::digest`].
#[derive(Clone)]
pub struct Composition {
    node: Arc<Node>,
}

impl Composition {
    /// Starts a chain from a catalog image.
    #[must_use]
    pub fn base(image: ImageRef) -> Self {
        Self::root(BaseImage::Registry(image), None)
    }

    /// Starts a chain from a catalog image selected for `platform`.
    #[must_use]
    pub fn base_for(image: ImageRef, platform: Platform) -> Self {
        Self::root(BaseImage::Registry(image), Some(platform))
    }

    /// Parses `reference` and starts a chain from it.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::Config` for a malformed reference.
    pub fn from_image(reference: &str) -> Result<Self> {
        Ok(Self::base(ImageRef::parse(reference)?))
    }

    /// Starts a chain from an empty filesystem.
    #[must_use]
    pub fn scratch() -> Self {
        Self::root(BaseImage::Scratch, None)
    }

    /// Starts a chain from an empty filesystem tagged with `platform`.
    #[must_use]
    pub fn scratch_for(platform: Platform) -> Self {
        Self::root(BaseImage::Scratch, Some(platform))
    }

    fn root(image: BaseImage, platform: Option<Platform>) -> Self {
        Self::chain(None, Operation::Base { image, platform })
    }

    fn chain(parent: Option<&Self>, operation: Operation) -> Self {
        let mut fp = Fingerprint::default();
        let _ = fp.str(parent.map_or("", |p| p.digest().as_hex()));
        operation.fingerprint(&mut fp);

        let platform = match &operation {
            Operation::Base { platform, .. } => *platform,
            _ => parent.and_then(Self::platform),
        };
        Self {
            node: Arc::new(Node {
                parent: parent.cloned(),
                digest: fp.finish(),
                platform,
                depth: parent.map_or(1, |p| p.len() + 1),
                operation,
            }),
        }
    }

    /// Returns a new composition with `operation` appended.
    #[must_use]
    pub fn apply(&self, operation: Operation) -> Self {
        Self::chain(Some(self), operation)
    }

    /// Structural digest of the whole chain.
    #[must_use]
    pub fn digest(&self) -> &Digest {
        &self.node.digest
    }

    /// The last operation of the chain.
    #[must_use]
    pub fn operation(&self) -> &Operation {
        &self.node.operation
    }

    /// The chain without its last operation.
    #[must_use]
    pub fn parent(&self) -> Option<&Self> {
        self.node.parent.as_ref()
    }

    /// Platform selected by the nearest base operation, if any.
    #[must_use]
    pub fn platform(&self) -> Option<Platform> {
        self.node.platform
    }

    /// Number of operations in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.node.depth
    }

    /// Always `false`: every chain starts with a base operation.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Every prefix of this chain, root first, ending with `self`.
    #[must_use]
    pub fn lineage(&self) -> Vec<Self> {
        let mut chain = Vec::with_capacity(self.len());
        let mut cursor = Some(self);
        while let Some(c) = cursor {
            chain.push(c.clone());
            cursor = c.parent();
        }
        chain.reverse();
        chain
    }

    /// Operations of the chain, root first.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.lineage()
            .into_iter()
            .map(|c| c.operation().clone())
            .collect()
    }

    /// Returns `true` if `other` is this chain or one of its prefixes.
    #[must_use]
    pub fn starts_with(&self, other: &Self) -> bool {
        let mut cursor = Some(self);
        while let Some(c) = cursor {
            if c.len() < other.len() {
                return false;
            }
            if c == other {
                return true;
            }
            cursor = c.parent();
        }
        false
    }

    /// Runs a command.
    #[must_use]
    pub fn with_exec<I, S>(&self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.apply(Operation::Exec {
            args: args.into_iter().map(Into::into).collect(),
        })
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn with_env(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.apply(Operation::Env {
            key: key.into(),
            value: value.into(),
        })
    }

    /// Changes the working directory.
    #[must_use]
    pub fn with_workdir(&self, path: impl Into<String>) -> Self {
        self.apply(Operation::Workdir { path: path.into() })
    }

    /// Writes a file with the default permissions.
    #[must_use]
    pub fn with_new_file(&self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.with_new_file_mode(path, contents, Operation::DEFAULT_FILE_PERMISSIONS)
    }

    /// Writes a file with explicit permission bits.
    #[must_use]
    pub fn with_new_file_mode(
        &self,
        path: impl Into<String>,
        contents: impl Into<String>,
        permissions: u32,
    ) -> Self {
        self.apply(Operation::NewFile {
            path: path.into(),
            contents: contents.into(),
            permissions,
        })
    }

    /// Copies a file in.
    #[must_use]
    pub fn with_file(&self, path: impl Into<String>, source: FileSource) -> Self {
        self.apply(Operation::WithFile {
            path: path.into(),
            source,
        })
    }

    /// Copies a directory's contents in.
    #[must_use]
    pub fn with_directory(&self, path: impl Into<String>, source: DirectorySource) -> Self {
        self.apply(Operation::WithDirectory {
            path: path.into(),
            source,
        })
    }

    /// Mounts a directory for subsequent commands.
    #[must_use]
    pub fn with_mounted_directory(
        &self,
        path: impl Into<String>,
        source: DirectorySource,
    ) -> Self {
        self.apply(Operation::MountDirectory {
            path: path.into(),
            source,
        })
    }

    /// Mounts a file for subsequent commands.
    #[must_use]
    pub fn with_mounted_file(&self, path: impl Into<String>, source: FileSource) -> Self {
        self.apply(Operation::MountFile {
            path: path.into(),
            source,
        })
    }

    /// Forwards a unix socket for subsequent commands.
    #[must_use]
    pub fn with_unix_socket(&self, path: impl Into<String>, source: SocketSource) -> Self {
        self.apply(Operation::UnixSocket {
            path: path.into(),
            source,
        })
    }

    /// References a directory inside this composition's filesystem.
    #[must_use]
    pub fn directory(&self, path: impl Into<String>) -> DirectorySource {
        DirectorySource::Composition {
            composition: self.clone(),
            path: path.into(),
        }
    }

    /// References a file inside this composition's filesystem.
    #[must_use]
    pub fn file(&self, path: impl Into<String>) -> FileSource {
        FileSource::Composition {
            composition: self.clone(),
            path: path.into(),
        }
    }
}

impl PartialEq for Composition {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node) || self.node.digest == other.node.digest
    }
}

impl Eq for Composition {}

impl Hash for Composition {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.digest.hash(state);
    }
}

impl fmt::Debug for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Composition")
            .field("digest", &self.node.digest.short())
            .field("len", &self.node.depth)
            .field("operation", &self.node.operation.to_string())
            .finish()
    }
}

impl fmt::Display for Composition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} ops)", self.node.digest.short(), self.node.depth)
    }
}

#[cfg(test)]
mod tests {
    use dockyard_common::types::{Arch, Os};

    use super::*;

    fn alpine() -> Composition {
        Composition::from_image("alpine:3.17.1").expect("valid reference")
    }

    #[test]
    fn identical_chains_are_equal() {
        let a = alpine().with_exec(["apk", "update"]).with_env("A", "1");
        let b = alpine().with_exec(["apk", "update"]).with_env("A", "1");
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn operation_order_changes_digest() {
        let a = alpine().with_env("A", "1").with_env("B", "2");
        let b = alpine().with_env("B", "2").with_env("A", "1");
        assert_ne!(a, b);
    }

    #[test]
    fn apply_does_not_mutate_receiver() {
        let base = alpine();
        let before = base.digest().clone();
        let _ = base.with_exec(["true"]);
        assert_eq!(base.digest(), &before);
        assert_eq!(base.len(), 1);
    }

    #[test]
    fn branches_share_prefix() {
        let prefix = alpine().with_exec(["apk", "update"]);
        let left = prefix.with_exec(["apk", "add", "bash"]);
        let right = prefix.with_exec(["apk", "add", "curl"]);
        assert_eq!(left.parent(), Some(&prefix));
        assert_eq!(right.parent(), Some(&prefix));
        assert!(left.starts_with(&prefix));
        assert!(!left.starts_with(&right));
    }

    #[test]
    fn lineage_is_root_first() {
        let c = alpine().with_workdir("/src").with_exec(["ls"]);
        let ops = c.operations();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], Operation::Base { .. }));
        assert!(matches!(ops[2], Operation::Exec { .. }));
    }

    #[test]
    fn platform_is_inherited_from_base() {
        let p = Platform::new(Os::Linux, Arch::Arm64);
        let c = Composition::scratch_for(p).with_env("X", "y");
        assert_eq!(c.platform(), Some(p));
        assert_eq!(alpine().platform(), None);
    }

    #[test]
    fn source_digest_participates_in_identity() {
        let left = alpine().with_new_file("/a", "left");
        let right = alpine().with_new_file("/a", "right");
        let from_left = Composition::scratch().with_directory("/", left.directory("/"));
        let from_right = Composition::scratch().with_directory("/", right.directory("/"));
        assert_ne!(from_left, from_right);
    }

    #[test]
    fn compositions_can_key_hash_sets() {
        let mut set = std::collections::HashSet::new();
        let _ = set.insert(alpine());
        let _ = set.insert(alpine());
        assert_eq!(set.len(), 1);
    }
}
