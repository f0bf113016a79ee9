//! Container-capable base with the engine CLI installed.

use dockyard_common::constants::{
    DEFAULT_ENGINE_CLI_VERSION, DEFAULT_GO_TOOLCHAIN_IMAGE, ENGINE_CLI_BIN_PATH,
    ENGINE_CLI_REPOSITORY, ENGINE_CONTAINER_NAME,
};
use dockyard_common::error::Result;
use dockyard_core::composition::Composition;
use dockyard_core::operation::split_command;
use dockyard_core::source::DirectorySource;

use crate::binary::{CompiledBinary, TargetEnv};
use crate::docker::{DockerOpts, docker, host_docker_dir};

/// Variable the SDKs read the CLI location from.
pub const CLI_BIN_ENV: &str = "_EXPERIMENTAL_DAGGER_CLI_BIN";

/// Variable the SDKs read the engine address from.
pub const RUNNER_HOST_ENV: &str = "_EXPERIMENTAL_DAGGER_RUNNER_HOST";

/// Where registry credentials are mounted.
pub const CREDENTIALS_PATH: &str = "/root/.docker";

const MANIFESTS: [&str; 4] = ["go.mod", "go.sum", "sdk/go/go.mod", "sdk/go/go.sum"];
const OUTPUT: &str = "./bin/dagger";

/// Options for [`engine_cli`].
#[derive(Debug, Clone, Default)]
pub struct EngineCliOpts {
    /// Image to extend; `None` uses the default docker base.
    pub image: Option<Composition>,
    /// CLI release, checked out by tag; empty selects
    /// [`DEFAULT_ENGINE_CLI_VERSION`].
    pub version: String,
    /// Docker client release; empty selects the docker default.
    pub docker_version: String,
}

/// Adds the docker socket and client to the base, mounts a CLI compiled
/// for the host platform at [`ENGINE_CLI_BIN_PATH`], and points the SDKs
/// at it and at the engine container. Host registry credentials are
/// mounted when present.
///
/// # Errors
///
/// Returns an error if the default base cannot be built.
pub fn engine_cli(opts: &EngineCliOpts) -> Result<Composition> {
    let version = crate::or_default(&opts.version, DEFAULT_ENGINE_CLI_VERSION);
    let base = docker(&DockerOpts {
        image: opts.image.clone(),
        version: opts.docker_version.clone(),
    })?;
    Ok(base
        .with_mounted_directory(CREDENTIALS_PATH, host_docker_dir())
        .with_mounted_file(ENGINE_CLI_BIN_PATH, binary(version, TargetEnv::default())?.file())
        .with_env(CLI_BIN_ENV, ENGINE_CLI_BIN_PATH)
        .with_env(
            RUNNER_HOST_ENV,
            format!("docker-container://{ENGINE_CONTAINER_NAME}"),
        ))
}

/// The engine CLI compiled from its tagged release for `target`.
///
/// # Errors
///
/// Returns `DockyardError::Config` if the toolchain image reference is
/// malformed.
pub fn binary(version: &str, target: TargetEnv) -> Result<CompiledBinary> {
    let source = DirectorySource::git(ENGINE_CLI_REPOSITORY, format!("v{version}"));
    Ok(CompiledBinary::new(
        go_toolchain()?,
        source,
        ["go", "build", "-o", OUTPUT, "-ldflags", "-s -w", "./cmd/dagger"],
        OUTPUT,
    )
    .with_workdir("/app")
    .with_dependency_step(&MANIFESTS, ["go", "mod", "download"])
    .with_target(target))
}

fn go_toolchain() -> Result<Composition> {
    Ok(Composition::from_image(DEFAULT_GO_TOOLCHAIN_IMAGE)?
        .with_exec(split_command("apk add build-base"))
        .with_env("CGO_ENABLED", "0")
        .with_exec(["apk", "add", "git"]))
}

#[cfg(test)]
mod tests {
    use dockyard_common::types::{Arch, Os, Platform};
    use dockyard_core::operation::Operation;

    use super::*;

    fn base() -> Composition {
        Composition::scratch_for(Platform::new(Os::Linux, Arch::Amd64))
    }

    #[test]
    fn engine_cli_mounts_binary_and_sets_sdk_env() {
        let c = engine_cli(&EngineCliOpts {
            image: Some(base()),
            ..EngineCliOpts::default()
        })
        .expect("engine cli");
        let ops = c.operations();
        let rendered: Vec<String> = ops.iter().map(ToString::to_string).collect();
        assert!(rendered.iter().any(|op| op.starts_with("mount /root/.docker")));
        assert!(rendered.iter().any(|op| op.starts_with("mount-file /usr/local/bin/dagger")));
        assert_eq!(
            ops.last(),
            Some(&Operation::Env {
                key: RUNNER_HOST_ENV.into(),
                value: "docker-container://dagger-engine.ci".into(),
            })
        );
    }

    #[test]
    fn binary_checks_out_tagged_release() {
        let build = binary("0.3.12", TargetEnv::default()).expect("binary");
        assert_eq!(
            build.source,
            DirectorySource::git(ENGINE_CLI_REPOSITORY, "v0.3.12")
        );
        assert_eq!(build.manifests.len(), 4);
        assert_eq!(build.workdir, "/app");
    }

    #[test]
    fn binary_for_platform_sets_go_overrides() {
        let target = TargetEnv::go(Some(Os::Darwin), Some(Arch::Arm64), None);
        let rendered: Vec<String> = binary("0.3.12", target)
            .expect("binary")
            .container()
            .operations()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert!(rendered.contains(&"env GOOS=darwin".to_string()));
        assert!(rendered.contains(&"env GOARCH=arm64".to_string()));
        assert_eq!(rendered[0], "from golang:1.20.0-alpine");
    }
}
