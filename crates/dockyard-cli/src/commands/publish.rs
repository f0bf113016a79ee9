//! `dockyard publish`: Build one runtime image per platform and publish them
//! under a single multi-platform reference.

use std::path::PathBuf;

use clap::Args;

use super::{Context, MatrixArgs};
use crate::output::{BOLD, GREEN, RESET};

/// Arguments for the `publish` command.
#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Matrix overrides.
    #[command(flatten)]
    pub matrix: MatrixArgs,

    /// Project source directory.
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Repository and tag to publish to, e.g. `acme/calc:latest`.
    #[arg(short, long)]
    pub target: Option<String>,
}

/// Executes the `publish` command.
///
/// Prints the published `repository:tag@sha256:<hex>` reference on
/// standard output.
///
/// # Errors
///
/// Returns an error if the target is malformed, the matrix is empty or
/// repeats a platform, or any variant fails to build.
#[allow(clippy::print_stdout)]
pub fn execute(args: PublishArgs, ctx: &mut Context) -> anyhow::Result<()> {
    args.matrix.apply(&mut ctx.pipeline);
    if let Some(source) = args.source {
        ctx.pipeline.source_dir = source;
    }
    if let Some(target) = args.target {
        ctx.pipeline.publish_target = target;
    }

    let published = ctx.run(|client, config| async move {
        dockyard_pipeline::tasks::publish(&client, &config).await
    })?;

    eprintln!(
        "{BOLD}{GREEN}Published{RESET} {} for {}",
        published.reference,
        published
            .platforms
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("{published}");
    Ok(())
}
