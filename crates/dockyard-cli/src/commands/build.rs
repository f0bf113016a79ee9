//! `dockyard build`: Build the payload for every platform of the matrix.

use std::path::PathBuf;

use clap::Args;

use super::{Context, MatrixArgs};
use crate::output::{self, BOLD, GREEN, RESET};

/// Arguments for the `build` command.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Matrix overrides.
    #[command(flatten)]
    pub matrix: MatrixArgs,

    /// Project source directory.
    #[arg(long)]
    pub source: Option<PathBuf>,

    /// Directory the `out/<os>/<arch>/` tree is exported under.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Executes the `build` command.
///
/// # Errors
///
/// Returns an error if any platform fails to build; nothing is exported
/// in that case.
pub fn execute(args: BuildArgs, ctx: &mut Context) -> anyhow::Result<()> {
    args.matrix.apply(&mut ctx.pipeline);
    if let Some(source) = args.source {
        ctx.pipeline.source_dir = source;
    }
    if let Some(out) = args.output {
        ctx.pipeline.output_dir = out;
    }
    tracing::info!(
        oses = ?ctx.pipeline.oses,
        arches = ?ctx.pipeline.arches,
        "building matrix"
    );

    let (tree, written) =
        ctx.run(|client, config| async move { dockyard_pipeline::tasks::build(&client, &config).await })?;

    eprintln!(
        "{BOLD}{GREEN}Built{RESET} {} platform(s)",
        tree.entries().len()
    );
    for path in &written {
        let size = std::fs::metadata(path).map_or(0, |m| m.len());
        eprintln!("  {}  {}", path.display(), output::format_bytes(size));
    }
    Ok(())
}
