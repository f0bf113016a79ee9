//! Build matrix orchestration.
//!
//! A matrix is the cross product of an ordered list of operating systems
//! and an ordered list of architectures, operating systems outermost. Every
//! platform gets its own build composition derived from one shared
//! toolchain prefix; the builds are independent and are resolved
//! concurrently, and the first failure aborts the rest. Only when every
//! build succeeded are the per-platform outputs assembled into one tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dockyard_blocks::binary::{CompiledBinary, TargetEnv};
use dockyard_common::config::PipelineConfig;
use dockyard_common::constants::SOURCE_MOUNT_PATH;
use dockyard_common::error::{DockyardError, Result};
use dockyard_common::types::{Arch, Os, Platform};
use dockyard_core::client::Client;
use dockyard_core::composition::Composition;
use dockyard_core::engine::Artifact;
use dockyard_core::source::DirectorySource;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Ordered target operating systems and architectures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildMatrix {
    oses: Vec<Os>,
    arches: Vec<Arch>,
}

impl BuildMatrix {
    /// Creates a matrix; order of both lists is preserved.
    #[must_use]
    pub const fn new(oses: Vec<Os>, arches: Vec<Arch>) -> Self {
        Self { oses, arches }
    }

    /// The matrix configured for the pipeline.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.oses.clone(), config.arches.clone())
    }

    /// Every (os, arch) pair, operating systems in the outer loop.
    #[must_use]
    pub fn cross_product(&self) -> Vec<Platform> {
        self.oses
            .iter()
            .flat_map(|&os| self.arches.iter().map(move |&arch| Platform::new(os, arch)))
            .collect()
    }

    /// Number of platforms in the matrix.
    #[must_use]
    pub fn len(&self) -> usize {
        self.oses.len() * self.arches.len()
    }

    /// Returns `true` if either list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output directory of `platform`'s build: `out/<os>/<arch>/`.
#[must_use]
pub fn output_path(platform: Platform) -> String {
    format!("out/{}/{}/", platform.os, platform.arch)
}

/// How to build the payload for one platform.
#[derive(Debug, Clone)]
pub struct BuildRecipe {
    /// Toolchain image every platform build starts from.
    pub toolchain: Composition,
    /// Project sources, placed at [`SOURCE_MOUNT_PATH`].
    pub source: DirectorySource,
    /// Build command; `{out}`, `{os}` and `{arch}` are substituted.
    pub command: Vec<String>,
    /// Extra variables set on the toolchain before any platform variable.
    pub env: Vec<(String, String)>,
}

impl BuildRecipe {
    /// A recipe with no extra variables.
    #[must_use]
    pub const fn new(toolchain: Composition, source: DirectorySource, command: Vec<String>) -> Self {
        Self {
            toolchain,
            source,
            command,
            env: Vec::new(),
        }
    }

    /// The recipe configured for the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::Config` if the toolchain image reference is
    /// malformed.
    pub fn from_config(config: &PipelineConfig, source: DirectorySource) -> Result<Self> {
        Ok(Self::new(
            Composition::from_image(&config.toolchain_image())?,
            source,
            config.build_command.clone(),
        ))
    }

    /// Sets an extra variable.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The build command with placeholders filled in for `platform`.
    #[must_use]
    pub fn command_for(&self, platform: Platform, out: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{out}", out)
                    .replace("{os}", platform.os.as_str())
                    .replace("{arch}", platform.arch.as_str())
            })
            .collect()
    }

    /// The compiled-binary recipe for `platform`, writing into `out`.
    #[must_use]
    pub fn binary(&self, platform: Platform, out: &str) -> CompiledBinary {
        let toolchain = self
            .env
            .iter()
            .fold(self.toolchain.clone(), |c, (k, v)| c.with_env(k.as_str(), v.as_str()));
        CompiledBinary::new(
            toolchain,
            self.source.clone(),
            self.command_for(platform, out),
            out,
        )
        .with_workdir(SOURCE_MOUNT_PATH)
        .with_target(TargetEnv::rust(platform))
    }

    /// The composition that builds `platform` into `out`.
    #[must_use]
    pub fn build(&self, platform: Platform, out: &str) -> Composition {
        self.binary(platform, out).container()
    }
}

/// One platform's slot in an [`OutputTree`].
#[derive(Debug, Clone)]
pub struct OutputEntry {
    /// Path of the slot, `out/<os>/<arch>/`.
    pub key: String,
    /// Platform built into the slot.
    pub platform: Platform,
    /// Composition whose `key` directory fills the slot.
    pub build: Composition,
}

/// Per-platform build outputs assembled into one directory.
#[derive(Debug, Clone)]
pub struct OutputTree {
    entries: Vec<OutputEntry>,
    directory: Composition,
    built: Vec<Artifact>,
}

impl OutputTree {
    /// Assembles the entries, in order, into one directory composition.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::Assembly` if two entries share a key.
    pub fn assemble(entries: Vec<OutputEntry>) -> Result<Self> {
        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|e| e.key == entry.key) {
                return Err(DockyardError::assembly(format!(
                    "duplicate output key {}",
                    entry.key
                )));
            }
        }
        let directory = entries.iter().fold(Composition::scratch(), |dir, entry| {
            dir.with_directory(entry.key.as_str(), entry.build.directory(entry.key.as_str()))
        });
        Ok(Self {
            entries,
            directory,
            built: Vec::new(),
        })
    }

    /// Attaches the realized build of every entry, in entry order, so the
    /// tree can be exported without resolving the builds again.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::Assembly` if the artifacts do not match the
    /// entries one to one.
    pub fn with_artifacts(mut self, artifacts: Vec<(Platform, Artifact)>) -> Result<Self> {
        let matches = artifacts.len() == self.entries.len()
            && self
                .entries
                .iter()
                .zip(&artifacts)
                .all(|(entry, (platform, _))| entry.platform == *platform);
        if !matches {
            return Err(DockyardError::assembly(
                "built artifacts do not match the output entries",
            ));
        }
        self.built = artifacts.into_iter().map(|(_, artifact)| artifact).collect();
        Ok(self)
    }

    /// Entries in assembly order.
    #[must_use]
    pub fn entries(&self) -> &[OutputEntry] {
        &self.entries
    }

    /// Keys in assembly order.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    /// The assembled directory.
    #[must_use]
    pub const fn directory(&self) -> &Composition {
        &self.directory
    }

    /// Writes the assembled directory under `target`.
    ///
    /// Slots whose build is attached are copied straight from it; otherwise
    /// the assembled directory is resolved first.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if the tree cannot be resolved or written.
    pub async fn export(&self, client: &Client, target: &Path) -> Result<Vec<PathBuf>> {
        let written = if self.built.is_empty() {
            client.export(&self.directory, target).await?
        } else {
            let mut written = Vec::new();
            for (entry, artifact) in self.entries.iter().zip(&self.built) {
                let slot = Artifact {
                    rootfs: artifact.workdir_path(&entry.key),
                    ..artifact.clone()
                };
                written.extend(client.export_artifact(slot, target.join(&entry.key)).await?);
            }
            written
        };
        tracing::info!(
            target = %target.display(),
            platforms = self.entries.len(),
            files = written.len(),
            "output tree exported"
        );
        Ok(written)
    }
}

/// Resolves every composition concurrently, at most
/// [`Client::parallelism`] at a time, and returns the artifacts in input
/// order.
///
/// The first failure cancels the builds still running and is returned;
/// later failures caused by that cancellation are discarded.
///
/// # Errors
///
/// Returns the first error any resolution reported.
pub async fn resolve_all(
    client: &Client,
    jobs: Vec<(Platform, Composition)>,
) -> Result<Vec<(Platform, Artifact)>> {
    let cancel = client.cancel_token().child();
    let scoped = client.with_cancel(cancel.clone());
    let semaphore = Arc::new(Semaphore::new(client.parallelism()));
    let mut slots: Vec<Option<(Platform, Artifact)>> = vec![None; jobs.len()];

    let mut set = JoinSet::new();
    for (index, (platform, composition)) in jobs.into_iter().enumerate() {
        let client = scoped.clone();
        let semaphore = Arc::clone(&semaphore);
        let _ = set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| DockyardError::Cancelled)?;
            tracing::info!(platform = %platform, "building");
            let artifact = client.resolve(&composition).await?;
            tracing::info!(platform = %platform, digest = %artifact.content.short(), "built");
            Ok::<_, DockyardError>((index, platform, artifact))
        });
    }

    while let Some(joined) = set.join_next().await {
        let outcome = joined
            .map_err(|e| DockyardError::execution("build task", e.to_string()))
            .and_then(|r| r);
        match outcome {
            Ok((index, platform, artifact)) => slots[index] = Some((platform, artifact)),
            Err(e) => {
                tracing::error!(error = %e, "build failed, aborting remaining platforms");
                cancel.cancel();
                set.abort_all();
                while set.join_next().await.is_some() {}
                return Err(e);
            }
        }
    }
    Ok(slots.into_iter().flatten().collect())
}

/// Builds every platform of `matrix` and assembles the outputs.
///
/// Nothing is assembled unless every platform built.
///
/// # Errors
///
/// Returns the first build error.
pub async fn build_matrix(
    client: &Client,
    matrix: &BuildMatrix,
    recipe: &BuildRecipe,
) -> Result<OutputTree> {
    let entries: Vec<OutputEntry> = matrix
        .cross_product()
        .into_iter()
        .map(|platform| {
            let key = output_path(platform);
            OutputEntry {
                build: recipe.build(platform, &key),
                key,
                platform,
            }
        })
        .collect();
    tracing::info!(platforms = entries.len(), "building matrix");

    let jobs = entries
        .iter()
        .map(|e| (e.platform, e.build.clone()))
        .collect();
    let artifacts = resolve_all(client, jobs).await?;
    OutputTree::assemble(entries)?.with_artifacts(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe() -> BuildRecipe {
        BuildRecipe::new(
            Composition::from_image("rust:1.86-alpine").expect("reference"),
            DirectorySource::host("/project"),
            vec!["build".into(), "--os={os}".into(), "--arch={arch}".into(), "{out}".into()],
        )
    }

    #[test]
    fn cross_product_iterates_oses_outermost() {
        let matrix = BuildMatrix::new(vec![Os::Linux, Os::Darwin], vec![Arch::Amd64, Arch::Arm64]);
        let keys: Vec<String> = matrix.cross_product().into_iter().map(output_path).collect();
        assert_eq!(
            keys,
            [
                "out/linux/amd64/",
                "out/linux/arm64/",
                "out/darwin/amd64/",
                "out/darwin/arm64/",
            ]
        );
        assert_eq!(matrix.len(), 4);
    }

    #[test]
    fn cross_product_of_empty_axis_is_empty() {
        let matrix = BuildMatrix::new(vec![Os::Linux], Vec::new());
        assert!(matrix.cross_product().is_empty());
        assert!(matrix.is_empty());
    }

    #[test]
    fn command_placeholders_are_substituted() {
        let platform = Platform::new(Os::Darwin, Arch::Arm64);
        assert_eq!(
            recipe().command_for(platform, "out/darwin/arm64/"),
            ["build", "--os=darwin", "--arch=arm64", "out/darwin/arm64/"]
        );
    }

    #[test]
    fn platform_builds_share_toolchain_prefix() {
        let recipe = recipe();
        let linux = recipe.build(Platform::new(Os::Linux, Arch::Amd64), "out/");
        let darwin = recipe.build(Platform::new(Os::Darwin, Arch::Amd64), "out/");
        assert!(linux.starts_with(&recipe.toolchain));
        assert!(darwin.starts_with(&recipe.toolchain));
        assert_ne!(linux, darwin);
        let rendered: Vec<String> = linux.operations().iter().map(ToString::to_string).collect();
        assert!(rendered.contains(&"env TARGETOS=linux".to_string()));
        assert!(rendered.contains(&"env CARGO_BUILD_TARGET=x86_64-unknown-linux-musl".to_string()));
    }

    #[test]
    fn output_tree_rejects_duplicate_keys() {
        let build = Composition::scratch();
        let entry = OutputEntry {
            key: "out/linux/amd64/".into(),
            platform: Platform::new(Os::Linux, Arch::Amd64),
            build,
        };
        let err = OutputTree::assemble(vec![entry.clone(), entry]).unwrap_err();
        assert!(err.is_assembly());
    }

    #[test]
    fn output_tree_keeps_entry_order() {
        let matrix = BuildMatrix::new(vec![Os::Darwin, Os::Linux], vec![Arch::Arm64]);
        let entries = matrix
            .cross_product()
            .into_iter()
            .map(|platform| OutputEntry {
                key: output_path(platform),
                platform,
                build: Composition::scratch(),
            })
            .collect();
        let tree = OutputTree::assemble(entries).expect("assemble");
        assert_eq!(tree.keys(), ["out/darwin/arm64/", "out/linux/arm64/"]);
        assert_eq!(tree.directory().len(), 3);
    }

    #[test]
    fn attached_artifacts_must_follow_entry_order() {
        let linux = Platform::new(Os::Linux, Arch::Amd64);
        let darwin = Platform::new(Os::Darwin, Arch::Amd64);
        let entries: Vec<OutputEntry> = [linux, darwin]
            .into_iter()
            .map(|platform| OutputEntry {
                key: output_path(platform),
                platform,
                build: Composition::scratch(),
            })
            .collect();
        let artifact = Artifact {
            digest: Composition::scratch().digest().clone(),
            content: Composition::scratch().digest().clone(),
            rootfs: PathBuf::from("/store/rootfs"),
            platform: None,
            env: Vec::new(),
            workdir: "/".into(),
            mounts: Vec::new(),
            stdout: String::new(),
        };

        let swapped = OutputTree::assemble(entries.clone())
            .expect("assemble")
            .with_artifacts(vec![(darwin, artifact.clone()), (linux, artifact.clone())])
            .unwrap_err();
        assert!(swapped.is_assembly());

        let short = OutputTree::assemble(entries.clone())
            .expect("assemble")
            .with_artifacts(vec![(linux, artifact.clone())])
            .unwrap_err();
        assert!(short.is_assembly());

        let _ = OutputTree::assemble(entries)
            .expect("assemble")
            .with_artifacts(vec![(linux, artifact.clone()), (darwin, artifact)])
            .expect("matching artifacts");
    }
}
