//! The operations a composition chain is made of.

use std::fmt;

use dockyard_common::types::{ImageRef, Platform};
use sha2::{Digest as _, Sha256};

use crate::source::{DirectorySource, FileSource, SocketSource};

/// Root filesystem an operation chain starts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseImage {
    /// An image from the engine's image catalog.
    Registry(ImageRef),
    /// An empty filesystem.
    Scratch,
}

impl fmt::Display for BaseImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry(image) => write!(f, "{image}"),
            Self::Scratch => f.write_str("scratch"),
        }
    }
}

/// One immutable step in a composition chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Select the base filesystem, discarding anything before it.
    Base {
        /// Image to start from.
        image: BaseImage,
        /// Platform the image is selected for.
        platform: Option<Platform>,
    },
    /// Run a command; a non-zero exit fails the chain.
    Exec {
        /// Program and arguments.
        args: Vec<String>,
    },
    /// Write a file with literal contents.
    NewFile {
        /// Absolute or workdir-relative destination.
        path: String,
        /// File contents.
        contents: String,
        /// Unix permission bits.
        permissions: u32,
    },
    /// Copy a file into the filesystem.
    WithFile {
        /// Destination path.
        path: String,
        /// File to copy.
        source: FileSource,
    },
    /// Copy a directory's contents into the filesystem.
    WithDirectory {
        /// Destination path.
        path: String,
        /// Directory to copy.
        source: DirectorySource,
    },
    /// Mount a directory for subsequent commands without persisting it.
    MountDirectory {
        /// Mount point.
        path: String,
        /// Directory to mount.
        source: DirectorySource,
    },
    /// Mount a file for subsequent commands without persisting it.
    MountFile {
        /// Mount point.
        path: String,
        /// File to mount.
        source: FileSource,
    },
    /// Forward a unix socket for subsequent commands.
    UnixSocket {
        /// Socket path inside the container.
        path: String,
        /// Socket to forward.
        source: SocketSource,
    },
    /// Set an environment variable for subsequent commands.
    Env {
        /// Variable name.
        key: String,
        /// Variable value.
        value: String,
    },
    /// Change the working directory for subsequent commands.
    Workdir {
        /// New working directory.
        path: String,
    },
}

impl Operation {
    /// Default permission bits of files written by [`Operation::NewFile`].
    pub const DEFAULT_FILE_PERMISSIONS: u32 = 0o644;

    /// Returns the compositions this operation reads from.
    #[must_use]
    pub fn dependencies(&self) -> Vec<&crate::composition::Composition> {
        match self {
            Self::WithFile { source, .. } | Self::MountFile { source, .. } => {
                source.dependency().into_iter().collect()
            }
            Self::WithDirectory { source, .. } | Self::MountDirectory { source, .. } => {
                source.dependency().into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    pub(crate) fn fingerprint(&self, fp: &mut Fingerprint) {
        match self {
            Self::Base { image, platform } => {
                let _ = fp.tag("base").str(&image.to_string());
                let _ = fp.str(&platform.map(|p| p.to_string()).unwrap_or_default());
            }
            Self::Exec { args } => {
                let _ = fp.tag("exec").count(args.len());
                for arg in args {
                    let _ = fp.str(arg);
                }
            }
            Self::NewFile {
                path,
                contents,
                permissions,
            } => {
                let _ = fp
                    .tag("new-file")
                    .str(path)
                    .str(contents)
                    .count(*permissions as usize);
            }
            Self::WithFile { path, source } => {
                let _ = fp.tag("with-file").str(path);
                source.fingerprint(fp);
            }
            Self::WithDirectory { path, source } => {
                let _ = fp.tag("with-directory").str(path);
                source.fingerprint(fp);
            }
            Self::MountDirectory { path, source } => {
                let _ = fp.tag("mount-directory").str(path);
                source.fingerprint(fp);
            }
            Self::MountFile { path, source } => {
                let _ = fp.tag("mount-file").str(path);
                source.fingerprint(fp);
            }
            Self::UnixSocket { path, source } => {
                let _ = fp.tag("unix-socket").str(path);
                source.fingerprint(fp);
            }
            Self::Env { key, value } => {
                let _ = fp.tag("env").str(key).str(value);
            }
            Self::Workdir { path } => {
                let _ = fp.tag("workdir").str(path);
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Base {
                image,
                platform: Some(p),
            } => write!(f, "from {image} ({p})"),
            Self::Base { image, .. } => write!(f, "from {image}"),
            Self::Exec { args } => write!(f, "exec [{}]", args.join(" ")),
            Self::NewFile { path, .. } => write!(f, "new-file {path}"),
            Self::WithFile { path, source } => write!(f, "with-file {path} <- {source}"),
            Self::WithDirectory { path, source } => write!(f, "with-directory {path} <- {source}"),
            Self::MountDirectory { path, source } => write!(f, "mount {path} <- {source}"),
            Self::MountFile { path, source } => write!(f, "mount-file {path} <- {source}"),
            Self::UnixSocket { path, source } => write!(f, "unix-socket {path} <- {source}"),
            Self::Env { key, value } => write!(f, "env {key}={value}"),
            Self::Workdir { path } => write!(f, "workdir {path}"),
        }
    }
}

/// Length-prefixed SHA-256 feed used to derive structural digests.
#[derive(Debug, Default)]
pub(crate) struct Fingerprint(Sha256);

impl Fingerprint {
    pub(crate) fn tag(&mut self, tag: &str) -> &mut Self {
        self.str(tag)
    }

    pub(crate) fn str(&mut self, value: &str) -> &mut Self {
        let _ = self.count(value.len());
        self.0.update(value.as_bytes());
        self
    }

    pub(crate) fn count(&mut self, n: usize) -> &mut Self {
        self.0.update((n as u64).to_le_bytes());
        self
    }

    pub(crate) fn finish(self) -> dockyard_common::types::Digest {
        dockyard_common::types::Digest::from_hasher(self.0)
    }
}

/// Splits a command line on single spaces.
///
/// No quoting is understood; use an explicit argument vector for commands
/// whose arguments contain spaces.
#[must_use]
pub fn split_command(cmd: &str) -> Vec<String> {
    cmd.split(' ')
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_command_splits_on_spaces() {
        assert_eq!(split_command("apt-get update"), vec!["apt-get", "update"]);
    }

    #[test]
    fn split_command_drops_repeated_spaces() {
        assert_eq!(
            split_command("apk  --no-cache add bash"),
            vec!["apk", "--no-cache", "add", "bash"]
        );
    }

    #[test]
    fn display_renders_exec_arguments() {
        let op = Operation::Exec {
            args: split_command("go build ./cmd/calc"),
        };
        assert_eq!(op.to_string(), "exec [go build ./cmd/calc]");
    }

    #[test]
    fn fingerprint_distinguishes_argument_boundaries() {
        let joined = Operation::Exec {
            args: vec!["ab".into(), "c".into()],
        };
        let split = Operation::Exec {
            args: vec!["a".into(), "bc".into()],
        };
        let mut a = Fingerprint::default();
        let mut b = Fingerprint::default();
        joined.fingerprint(&mut a);
        split.fingerprint(&mut b);
        assert_ne!(a.finish(), b.finish());
    }

    #[test]
    fn operations_without_sources_have_no_dependencies() {
        let op = Operation::Env {
            key: "GOOS".into(),
            value: "linux".into(),
        };
        assert!(op.dependencies().is_empty());
    }
}
