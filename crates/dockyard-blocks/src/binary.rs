//! Compiling one binary from a source tree inside a toolchain image.
//!
//! The same recipe serves the engine CLI installer and the pipeline's
//! per-platform payload builds: mount only the dependency manifests and
//! resolve dependencies (a step that stays cached while only sources
//! change), copy in the full sources, set the target platform variables,
//! and run the build command.

use dockyard_common::constants::{CARGO_TARGET_ENV, TARGET_ARCH_ENV, TARGET_OS_ENV};
use dockyard_common::types::{Arch, Os, Platform};
use dockyard_core::composition::Composition;
use dockyard_core::source::{DirectorySource, FileSource};

/// Environment variables steering a toolchain at a target platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetEnv {
    vars: Vec<(String, String)>,
}

impl TargetEnv {
    /// Go cross-compilation overrides; unset values keep the toolchain's
    /// own defaults.
    #[must_use]
    pub fn go(os: Option<Os>, arch: Option<Arch>, arm: Option<&str>) -> Self {
        let mut vars = Vec::new();
        if let Some(os) = os {
            vars.push(("GOOS".to_string(), os.to_string()));
        }
        if let Some(arch) = arch {
            vars.push(("GOARCH".to_string(), arch.to_string()));
        }
        if let Some(arm) = arm.filter(|a| !a.is_empty()) {
            vars.push(("GOARM".to_string(), arm.to_string()));
        }
        Self { vars }
    }

    /// Variables for a cargo build targeting `platform`.
    #[must_use]
    pub fn rust(platform: Platform) -> Self {
        let mut vars = vec![
            (TARGET_OS_ENV.to_string(), platform.os.to_string()),
            (TARGET_ARCH_ENV.to_string(), platform.arch.to_string()),
        ];
        if let Some(triple) = platform.rust_target() {
            vars.push((CARGO_TARGET_ENV.to_string(), triple.to_string()));
        }
        Self { vars }
    }

    /// The variables, in the order they are set.
    #[must_use]
    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    /// Sets every variable on `composition`.
    #[must_use]
    pub fn apply(&self, composition: &Composition) -> Composition {
        self.vars
            .iter()
            .fold(composition.clone(), |c, (k, v)| c.with_env(k.as_str(), v.as_str()))
    }
}

/// A binary compiled from `source` inside `toolchain`.
#[derive(Debug, Clone)]
pub struct CompiledBinary {
    /// Toolchain image, including any setup steps.
    pub toolchain: Composition,
    /// Directory the sources are placed in.
    pub workdir: String,
    /// Source tree.
    pub source: DirectorySource,
    /// Dependency manifests, relative to the source root.
    pub manifests: Vec<String>,
    /// Command run with only the manifests present; empty to skip.
    pub dependency_command: Vec<String>,
    /// Command producing the output.
    pub build_command: Vec<String>,
    /// Output path, absolute or relative to `workdir`.
    pub output: String,
    /// Target platform overrides.
    pub target: TargetEnv,
}

impl CompiledBinary {
    /// A build with no dependency step and no target overrides.
    #[must_use]
    pub fn new<I, S>(
        toolchain: Composition,
        source: DirectorySource,
        build_command: I,
        output: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            toolchain,
            workdir: "/src".into(),
            source,
            manifests: Vec::new(),
            dependency_command: Vec::new(),
            build_command: build_command.into_iter().map(Into::into).collect(),
            output: output.into(),
            target: TargetEnv::default(),
        }
    }

    /// Places the sources in `workdir`.
    #[must_use]
    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Resolves dependencies from `manifests` alone before the full build.
    #[must_use]
    pub fn with_dependency_step<I, S>(mut self, manifests: &[&str], command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.manifests = manifests.iter().map(|m| (*m).to_string()).collect();
        self.dependency_command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Builds for another platform.
    #[must_use]
    pub fn with_target(mut self, target: TargetEnv) -> Self {
        self.target = target;
        self
    }

    /// A directory holding only the dependency manifests of the source.
    #[must_use]
    pub fn manifests(&self) -> Composition {
        let tree = Composition::scratch().with_directory("/", self.source.clone());
        self.manifests
            .iter()
            .fold(Composition::scratch(), |dir, m| {
                dir.with_file(m.as_str(), tree.file(m.as_str()))
            })
    }

    /// The toolchain after the build command has run.
    #[must_use]
    pub fn container(&self) -> Composition {
        let mut c = self.toolchain.with_workdir(self.workdir.as_str());
        if !self.manifests.is_empty() {
            c = c.with_mounted_directory(self.workdir.as_str(), self.manifests().directory("/"));
            if !self.dependency_command.is_empty() {
                c = c.with_exec(self.dependency_command.iter().map(String::as_str));
            }
        }
        let c = c.with_directory(self.workdir.as_str(), self.source.clone());
        self.target
            .apply(&c)
            .with_exec(self.build_command.iter().map(String::as_str))
    }

    /// The compiled output as a file.
    #[must_use]
    pub fn file(&self) -> FileSource {
        self.container().file(self.output.as_str())
    }

    /// The compiled output as a directory.
    #[must_use]
    pub fn directory(&self) -> DirectorySource {
        self.container().directory(self.output.as_str())
    }
}

#[cfg(test)]
mod tests {
    use dockyard_core::operation::Operation;

    use super::*;

    fn toolchain() -> Composition {
        Composition::from_image("rust:1.86-alpine").expect("reference")
    }

    #[test]
    fn rust_target_env_sets_triple() {
        let env = TargetEnv::rust(Platform::new(Os::Darwin, Arch::Arm64));
        assert_eq!(
            env.vars(),
            [
                ("TARGETOS".to_string(), "darwin".to_string()),
                ("TARGETARCH".to_string(), "arm64".to_string()),
                ("CARGO_BUILD_TARGET".to_string(), "aarch64-apple-darwin".to_string()),
            ]
        );
    }

    #[test]
    fn go_target_env_skips_unset_values() {
        let env = TargetEnv::go(Some(Os::Linux), None, Some(""));
        assert_eq!(env.vars(), [("GOOS".to_string(), "linux".to_string())]);
        assert!(TargetEnv::go(None, None, None).vars().is_empty());
    }

    #[test]
    fn build_without_dependency_step_copies_sources_then_builds() {
        let build = CompiledBinary::new(
            toolchain(),
            DirectorySource::host("/project"),
            ["cargo", "build"],
            "target/release/calc",
        );
        let ops = build.container().operations();
        assert_eq!(ops.len(), 4);
        assert_eq!(ops[1], Operation::Workdir { path: "/src".into() });
        assert!(matches!(ops[2], Operation::WithDirectory { .. }));
        assert_eq!(ops[3].to_string(), "exec [cargo build]");
    }

    #[test]
    fn dependency_step_precedes_full_sources() {
        let build = CompiledBinary::new(
            toolchain(),
            DirectorySource::host("/project"),
            ["go", "build", "-o", "./bin/tool"],
            "./bin/tool",
        )
        .with_workdir("/app")
        .with_dependency_step(&["go.mod", "go.sum"], ["go", "mod", "download"])
        .with_target(TargetEnv::go(Some(Os::Linux), Some(Arch::Arm), Some("7")));

        let rendered: Vec<String> = build
            .container()
            .operations()
            .iter()
            .map(ToString::to_string)
            .collect();
        let mount = rendered
            .iter()
            .position(|op| op.starts_with("mount /app"))
            .expect("manifest mount");
        let download = rendered
            .iter()
            .position(|op| op == "exec [go mod download]")
            .expect("dependency command");
        let copy = rendered
            .iter()
            .position(|op| op.starts_with("with-directory /app <- host:/project"))
            .expect("source copy");
        let goarm = rendered
            .iter()
            .position(|op| op == "env GOARM=7")
            .expect("target env");
        assert!(mount < download && download < copy && copy < goarm);
        assert_eq!(rendered.last().map(String::as_str), Some("exec [go build -o ./bin/tool]"));
    }

    #[test]
    fn manifests_change_only_with_manifest_list() {
        let source = DirectorySource::git("https://example.com/tool.git", "v1.0.0");
        let a = CompiledBinary::new(toolchain(), source.clone(), ["make"], "bin/tool")
            .with_dependency_step(&["go.mod"], ["go", "mod", "download"]);
        let b = CompiledBinary::new(toolchain(), source, ["make", "all"], "bin/tool")
            .with_dependency_step(&["go.mod"], ["go", "mod", "download"]);
        assert_eq!(a.manifests(), b.manifests());
        assert_ne!(a.container(), b.container());
    }
}
