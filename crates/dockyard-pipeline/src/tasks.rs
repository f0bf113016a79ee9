//! The four pipeline invocations.
//!
//! Each invocation runs against a [`Client`]; [`with_local_engine`] opens a
//! connection for one invocation and closes it on every exit path.

use std::future::Future;
use std::path::PathBuf;

use dockyard_common::config::{EngineConfig, PipelineConfig};
use dockyard_common::constants::SOURCE_MOUNT_PATH;
use dockyard_common::error::{DockyardError, Result};
use dockyard_common::types::ImageRef;
use dockyard_core::cancel::CancelToken;
use dockyard_core::client::Client;
use dockyard_core::composition::Composition;
use dockyard_core::source::DirectorySource;
use dockyard_core::variant::PublishedReference;
use dockyard_engine::LocalEngine;

use crate::matrix::{BuildMatrix, BuildRecipe, OutputTree, build_matrix};
use crate::publish::PublishAssembler;

/// Connects a [`LocalEngine`], runs `invocation`, and closes the
/// connection whether or not it succeeded.
///
/// # Errors
///
/// Returns `DockyardError::Connection` if the engine cannot be opened,
/// otherwise the invocation's error unchanged. A close failure is only
/// reported when the invocation itself succeeded.
pub async fn with_local_engine<T, F, Fut>(
    engine: &EngineConfig,
    cancel: CancelToken,
    invocation: F,
) -> Result<T>
where
    F: FnOnce(Client) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let client = Client::connect(LocalEngine::connect(engine)?, engine).with_cancel(cancel);
    let result = invocation(client.clone()).await;
    let closed = client.close();
    match (result, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                tracing::warn!(error = %close_err, "failed to close engine connection");
            }
            Err(e)
        }
    }
}

/// The project sources as an absolute host directory.
///
/// # Errors
///
/// Returns an error if the configured source directory does not exist.
pub fn project_source(config: &PipelineConfig) -> Result<DirectorySource> {
    let path = std::fs::canonicalize(&config.source_dir)
        .map_err(|e| DockyardError::io(&config.source_dir, e))?;
    Ok(DirectorySource::Host(path))
}

/// Builds the payload for every platform of the matrix and exports the
/// output tree to the configured output directory.
///
/// # Errors
///
/// Returns `DockyardError::Config` for an invalid matrix before anything
/// is built, otherwise the first build error; nothing is exported in that
/// case.
pub async fn build(client: &Client, config: &PipelineConfig) -> Result<(OutputTree, Vec<PathBuf>)> {
    config.validate()?;
    let recipe = BuildRecipe::from_config(config, project_source(config)?)?;
    let tree = build_matrix(client, &BuildMatrix::from_config(config), &recipe).await?;
    let written = tree.export(client, &config.output_dir).await?;
    Ok((tree, written))
}

/// Runs the lint command against the mounted sources and returns its
/// output.
///
/// # Errors
///
/// Returns `DockyardError::Execution` if the linter reports problems.
pub async fn lint(client: &Client, config: &PipelineConfig) -> Result<String> {
    config.validate()?;
    run_in_source(client, config, &config.lint_command).await
}

/// Runs the test command against the mounted sources and returns its
/// output.
///
/// # Errors
///
/// Returns `DockyardError::Execution` if any test fails.
pub async fn test(client: &Client, config: &PipelineConfig) -> Result<String> {
    config.validate()?;
    run_in_source(client, config, &config.test_command).await
}

/// Builds one runtime image per platform and publishes them to the
/// configured target.
///
/// # Errors
///
/// Returns `DockyardError::Config` for a malformed target or an invalid
/// matrix, `DockyardError::Assembly` for an empty matrix, or the first
/// build error.
pub async fn publish(client: &Client, config: &PipelineConfig) -> Result<PublishedReference> {
    config.validate()?;
    let reference = ImageRef::parse(&config.publish_target)?;
    let recipe = BuildRecipe::from_config(config, project_source(config)?)?;
    let platforms = BuildMatrix::from_config(config).cross_product();
    PublishAssembler::new(recipe)
        .publish(client, &reference, &platforms)
        .await
}

async fn run_in_source(client: &Client, config: &PipelineConfig, command: &[String]) -> Result<String> {
    let container = Composition::from_image(&config.toolchain_image())?
        .with_mounted_directory(SOURCE_MOUNT_PATH, project_source(config)?)
        .with_workdir(SOURCE_MOUNT_PATH)
        .with_exec(command.iter().map(String::as_str));
    client.stdout(&container).await
}
