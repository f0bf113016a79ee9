//! Container-capable base: images that can drive the host docker daemon.

use std::path::{Path, PathBuf};

use dockyard_common::constants::{
    DEFAULT_DOCKER_VERSION, DOCKER_CLI_IMAGE_PATH, DOCKER_CLI_MOUNT_PATH, DOCKER_SOCKET_PATH,
};
use dockyard_common::error::Result;
use dockyard_common::types::ImageRef;
use dockyard_core::composition::Composition;
use dockyard_core::source::{DirectorySource, SocketSource};

use crate::debian::{DebianOpts, debian};

/// Packages of the Debian base used when no image is supplied.
pub const DEFAULT_PACKAGES: [&str; 3] = ["bash", "curl", "openssh-client"];

/// Options for [`docker`].
#[derive(Debug, Clone, Default)]
pub struct DockerOpts {
    /// Image to extend; `None` builds a Debian base with
    /// [`DEFAULT_PACKAGES`].
    pub image: Option<Composition>,
    /// Docker client release; empty selects [`DEFAULT_DOCKER_VERSION`].
    pub version: String,
}

/// Forwards the host docker socket into `opts.image` and mounts a
/// statically linked docker client taken from the `docker:<version>-cli`
/// image.
///
/// # Errors
///
/// Returns an error if the default Debian base cannot be built.
pub fn docker(opts: &DockerOpts) -> Result<Composition> {
    let base = match &opts.image {
        Some(image) => image.clone(),
        None => debian(&DebianOpts::with_packages(&DEFAULT_PACKAGES))?,
    };
    let cli = docker_cli(&opts.version).file(DOCKER_CLI_IMAGE_PATH);
    Ok(base
        .with_unix_socket(DOCKER_SOCKET_PATH, SocketSource::Host(DOCKER_SOCKET_PATH.into()))
        .with_mounted_file(DOCKER_CLI_MOUNT_PATH, cli))
}

/// The image the docker client binary is taken from.
#[must_use]
pub fn docker_cli(version: &str) -> Composition {
    let version = crate::or_default(version, DEFAULT_DOCKER_VERSION);
    Composition::base(ImageRef::new("docker", format!("{version}-cli")))
}

/// The host's `~/.docker` directory when running on Linux and it exists,
/// otherwise an empty directory. Never fails.
#[must_use]
pub fn host_docker_dir() -> DirectorySource {
    if !cfg!(target_os = "linux") {
        return DirectorySource::Empty;
    }
    let home = std::env::var_os("HOME").map(PathBuf::from);
    docker_dir_in(home.as_deref())
}

fn docker_dir_in(home: Option<&Path>) -> DirectorySource {
    let Some(home) = home else {
        tracing::warn!("no home directory, using empty docker credentials");
        return DirectorySource::Empty;
    };
    let path = home.join(".docker");
    if path.is_dir() {
        DirectorySource::Host(path)
    } else {
        tracing::warn!(path = %path.display(), "docker credentials not found, using empty directory");
        DirectorySource::Empty
    }
}
