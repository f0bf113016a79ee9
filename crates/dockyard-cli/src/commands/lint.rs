//! `dockyard lint`: Lint the project sources in the toolchain image.

use std::path::PathBuf;

use clap::Args;

use super::Context;
use crate::output;

/// Arguments for the `lint` command.
#[derive(Args, Debug)]
pub struct LintArgs {
    /// Project source directory.
    #[arg(long)]
    pub source: Option<PathBuf>,
}

/// Executes the `lint` command.
///
/// # Errors
///
/// Returns an error if the linter reports problems.
pub fn execute(args: LintArgs, ctx: &mut Context) -> anyhow::Result<()> {
    if let Some(source) = args.source {
        ctx.pipeline.source_dir = source;
    }
    let report = ctx.run(|client, config| async move {
        dockyard_pipeline::tasks::lint(&client, &config).await
    })?;
    output::passed("Lint", &report);
    Ok(())
}
