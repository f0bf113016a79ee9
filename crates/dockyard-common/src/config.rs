//! Configuration models for the engine connection and the pipeline.
//!
//! Defaults come from [`crate::constants`]; nothing here reads process-wide
//! mutable state, callers pass these structs down explicitly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{DockyardError, Result};
use crate::types::{Arch, Os, Platform};

/// Where the engine forwards the output of executed commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "path")]
pub enum LogSink {
    /// Forward to the process's standard output.
    Stdout,
    /// Forward to the process's standard error.
    #[default]
    Stderr,
    /// Append to a file.
    File(PathBuf),
    /// Discard.
    Null,
}

/// How the engine confines executed commands to their root filesystem.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Use bubblewrap when it is installed and usable, otherwise run
    /// unconfined.
    #[default]
    Auto,
    /// Require bubblewrap; connecting fails without it.
    Bubblewrap,
    /// Run commands as host processes. Program lookup and the working
    /// directory stay inside the root filesystem, but absolute paths the
    /// command writes reach the host.
    Unconfined,
}

/// Settings for one engine connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the snapshot store, image catalog, and registry.
    pub data_dir: PathBuf,
    /// Destination of command output.
    pub log_sink: LogSink,
    /// Maximum number of compositions resolved concurrently by the pipeline.
    pub parallelism: usize,
    /// Confinement of executed commands.
    pub isolation: Isolation,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: constants::default_data_dir(),
            log_sink: LogSink::default(),
            parallelism: std::thread::available_parallelism().map_or(4, usize::from),
            isolation: Isolation::default(),
        }
    }
}

/// Settings for the build, lint, test, and publish invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Operating systems of the build matrix, outer loop order.
    pub oses: Vec<Os>,
    /// Architectures of the build matrix, inner loop order.
    pub arches: Vec<Arch>,
    /// Rust toolchain release; selects the `rust:<version>-alpine` image.
    pub rust_version: String,
    /// Host directory holding the project sources.
    pub source_dir: PathBuf,
    /// Host directory the output tree is exported to.
    pub output_dir: PathBuf,
    /// Repository and tag the multi-platform image is published to.
    pub publish_target: String,
    /// Build command; `{out}`, `{os}` and `{arch}` are substituted per platform.
    pub build_command: Vec<String>,
    /// Lint command run against the mounted sources.
    pub lint_command: Vec<String>,
    /// Test command run against the mounted sources.
    pub test_command: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            oses: vec![Os::Linux, Os::Darwin],
            arches: vec![Arch::Amd64, Arch::Arm64],
            rust_version: constants::DEFAULT_RUST_VERSION.to_string(),
            source_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            publish_target: constants::DEFAULT_PUBLISH_TARGET.to_string(),
            build_command: vec![
                "sh".into(),
                "-c".into(),
                format!(
                    "cargo build --release --bin {bin} && mkdir -p {{out}} && \
                     cp target/${target}/release/{bin} {{out}}",
                    bin = constants::PAYLOAD_BIN,
                    target = constants::CARGO_TARGET_ENV,
                ),
            ],
            lint_command: ["cargo", "clippy", "--workspace", "--", "-D", "warnings"]
                .map(String::from)
                .to_vec(),
            test_command: ["cargo", "test", "--workspace"].map(String::from).to_vec(),
        }
    }
}

impl PipelineConfig {
    /// Loads a configuration from a JSON file; missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| DockyardError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the toolchain image reference for the configured Rust release.
    #[must_use]
    pub fn toolchain_image(&self) -> String {
        let version = if self.rust_version.is_empty() {
            constants::DEFAULT_RUST_VERSION
        } else {
            &self.rust_version
        };
        format!("rust:{version}-alpine")
    }

    /// Checks that every command is non-empty and that the matrix names
    /// each operating system and architecture once, with a known target
    /// triple for every pair.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::Config` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        for (name, cmd) in [
            ("build_command", &self.build_command),
            ("lint_command", &self.lint_command),
            ("test_command", &self.test_command),
        ] {
            if cmd.is_empty() {
                return Err(DockyardError::Config {
                    message: format!("{name} must not be empty"),
                });
            }
        }
        if let Some(os) = first_repeat(&self.oses) {
            return Err(DockyardError::Config {
                message: format!("oses lists {os} more than once"),
            });
        }
        if let Some(arch) = first_repeat(&self.arches) {
            return Err(DockyardError::Config {
                message: format!("arches lists {arch} more than once"),
            });
        }
        for &os in &self.oses {
            for &arch in &self.arches {
                let platform = Platform::new(os, arch);
                if platform.rust_target().is_none() {
                    return Err(DockyardError::Config {
                        message: format!("no Rust target triple for {platform}"),
                    });
                }
            }
        }
        Ok(())
    }
}

fn first_repeat<T: PartialEq + Copy>(items: &[T]) -> Option<T> {
    items
        .iter()
        .enumerate()
        .find(|(i, item)| items[..*i].contains(item))
        .map(|(_, item)| *item)
}
