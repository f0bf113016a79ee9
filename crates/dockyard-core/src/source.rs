//! Inputs an operation can pull content from.
//!
//! A source either names something on the host, or points into another
//! composition. In the latter case resolving the operation implies
//! resolving that composition first.

use std::fmt;
use std::path::PathBuf;

use crate::composition::Composition;
use crate::operation::Fingerprint;

/// A directory an operation copies or mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectorySource {
    /// An empty directory.
    Empty,
    /// A directory on the host running the engine.
    Host(PathBuf),
    /// A directory inside the filesystem of another composition.
    Composition {
        /// Composition to resolve.
        composition: Composition,
        /// Path inside its filesystem.
        path: String,
    },
    /// A git repository checked out at a pinned reference.
    Git {
        /// Clone URL.
        url: String,
        /// Tag or branch to check out.
        reference: String,
    },
}

impl DirectorySource {
    /// A host directory.
    #[must_use]
    pub fn host(path: impl Into<PathBuf>) -> Self {
        Self::Host(path.into())
    }

    /// A pinned git checkout.
    #[must_use]
    pub fn git(url: impl Into<String>, reference: impl Into<String>) -> Self {
        Self::Git {
            url: url.into(),
            reference: reference.into(),
        }
    }

    /// Returns the compositions this source depends on.
    #[must_use]
    pub fn dependency(&self) -> Option<&Composition> {
        match self {
            Self::Composition { composition, .. } => Some(composition),
            _ => None,
        }
    }

    pub(crate) fn fingerprint(&self, fp: &mut Fingerprint) {
        let _ = match self {
            Self::Empty => fp.tag("dir:empty"),
            Self::Host(path) => fp.tag("dir:host").str(&path.to_string_lossy()),
            Self::Composition { composition, path } => fp
                .tag("dir:composition")
                .str(composition.digest().as_hex())
                .str(path),
            Self::Git { url, reference } => fp.tag("dir:git").str(url).str(reference),
        };
    }
}

impl fmt::Display for DirectorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("<empty>"),
            Self::Host(path) => write!(f, "host:{}", path.display()),
            Self::Composition { composition, path } => {
                write!(f, "{}:{path}", composition.digest().short())
            }
            Self::Git { url, reference } => write!(f, "{url}#{reference}"),
        }
    }
}

/// A single file an operation copies or mounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileSource {
    /// A file on the host running the engine.
    Host(PathBuf),
    /// A file inside the filesystem of another composition.
    Composition {
        /// Composition to resolve.
        composition: Composition,
        /// Path inside its filesystem.
        path: String,
    },
}

impl FileSource {
    /// A host file.
    #[must_use]
    pub fn host(path: impl Into<PathBuf>) -> Self {
        Self::Host(path.into())
    }

    /// Returns the composition this source depends on.
    #[must_use]
    pub fn dependency(&self) -> Option<&Composition> {
        match self {
            Self::Composition { composition, .. } => Some(composition),
            Self::Host(_) => None,
        }
    }

    pub(crate) fn fingerprint(&self, fp: &mut Fingerprint) {
        let _ = match self {
            Self::Host(path) => fp.tag("file:host").str(&path.to_string_lossy()),
            Self::Composition { composition, path } => fp
                .tag("file:composition")
                .str(composition.digest().as_hex())
                .str(path),
        };
    }
}

impl fmt::Display for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(path) => write!(f, "host:{}", path.display()),
            Self::Composition { composition, path } => {
                write!(f, "{}:{path}", composition.digest().short())
            }
        }
    }
}

/// A unix socket forwarded into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketSource {
    /// A socket on the host running the engine.
    Host(PathBuf),
}

impl SocketSource {
    pub(crate) fn fingerprint(&self, fp: &mut Fingerprint) {
        let Self::Host(path) = self;
        let _ = fp.tag("socket:host").str(&path.to_string_lossy());
    }
}

impl fmt::Display for SocketSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self::Host(path) = self;
        write!(f, "host:{}", path.display())
    }
}
