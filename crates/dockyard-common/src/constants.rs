//! System-wide constants and default values.
//!
//! Every default version used by the building blocks lives here so that
//! option structs can document and fall back to a single named value.

use std::path::PathBuf;

/// Name of the per-user data directory under `$HOME`.
pub const DATA_DIR_NAME: &str = ".dockyard";

/// Fallback data directory when no home directory is available.
pub const SYSTEM_DATA_DIR: &str = "/var/lib/dockyard";

/// Returns the default data directory, preferring `$HOME/.dockyard`.
#[must_use]
pub fn default_data_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_or_else(
            |_| PathBuf::from(SYSTEM_DATA_DIR),
            |home| PathBuf::from(home).join(DATA_DIR_NAME),
        )
}

/// Tag assumed when an image reference omits one.
pub const DEFAULT_TAG: &str = "latest";

/// SHA-256 digest length in hex characters.
pub const SHA256_HEX_LENGTH: usize = 64;

/// Default Alpine release for the minimal Linux base.
pub const DEFAULT_ALPINE_VERSION: &str = "3.17.1";

/// Default Debian release for the Debian base.
pub const DEFAULT_DEBIAN_VERSION: &str = "11.6";

/// Default version of the statically linked docker client.
pub const DEFAULT_DOCKER_VERSION: &str = "20.10.23";

/// Default engine CLI release compiled by the engine CLI installer.
pub const DEFAULT_ENGINE_CLI_VERSION: &str = "0.3.12";

/// Default Rust toolchain release used to compile the payload.
pub const DEFAULT_RUST_VERSION: &str = "1.86";

/// Default configuration-management tool release.
pub const DEFAULT_ANSIBLE_VERSION: &str = "7.1";

/// Default Go toolchain image used to compile the engine CLI.
pub const DEFAULT_GO_TOOLCHAIN_IMAGE: &str = "golang:1.20.0-alpine";

/// Git repository the engine CLI is compiled from.
pub const ENGINE_CLI_REPOSITORY: &str = "https://github.com/dagger/dagger.git";

/// Name of the engine container the installed CLI is pointed at.
pub const ENGINE_CONTAINER_NAME: &str = "dagger-engine.ci";

/// Path the compiled engine CLI is mounted at.
pub const ENGINE_CLI_BIN_PATH: &str = "/usr/local/bin/dagger";

/// Host and container path of the docker control socket.
pub const DOCKER_SOCKET_PATH: &str = "/var/run/docker.sock";

/// Path of the docker client inside the `docker:<version>-cli` image.
pub const DOCKER_CLI_IMAGE_PATH: &str = "/usr/local/bin/docker";

/// Path the docker client is mounted at in container-capable images.
pub const DOCKER_CLI_MOUNT_PATH: &str = "/usr/bin/docker";

/// Directory the configuration-management project is mounted at.
pub const ANSIBLE_CONFIG_LOCATION: &str = "/etc/ansible";

/// File name of the generated configuration-management config.
pub const ANSIBLE_CONFIG_FILE: &str = "ansible.cfg";

/// Environment variable pointing at [`ANSIBLE_CONFIG_LOCATION`].
pub const ANSIBLE_CONFIG_ENV: &str = "ANSIBLE_CONFIG_LOCATION";

/// Environment variable carrying the target operating system of a build.
pub const TARGET_OS_ENV: &str = "TARGETOS";

/// Environment variable carrying the target architecture of a build.
pub const TARGET_ARCH_ENV: &str = "TARGETARCH";

/// Environment variable cargo reads the target triple from.
pub const CARGO_TARGET_ENV: &str = "CARGO_BUILD_TARGET";

/// Directory inside the toolchain image the project source is mounted at.
pub const SOURCE_MOUNT_PATH: &str = "/src";

/// Fixed output directory used by per-platform publish builds.
pub const PUBLISH_OUTPUT_DIR: &str = "out/";

/// Default repository and tag the payload is published to.
pub const DEFAULT_PUBLISH_TARGET: &str = "dockyard/calc:latest";

/// Name of the payload binary.
pub const PAYLOAD_BIN: &str = "calc";

/// Application name used in CLI output.
pub const APP_NAME: &str = "dockyard";
